use std::io::{BufRead, BufReader};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::DescError;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One line of a request file and one element of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub custom_id: String,
    pub params: RequestParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Canceling,
    Ended,
}

impl JobStatus {
    pub fn parse(value: &str) -> Result<Self, DescError> {
        match value {
            "in_progress" => Ok(JobStatus::InProgress),
            "canceling" => Ok(JobStatus::Canceling),
            "ended" => Ok(JobStatus::Ended),
            other => Err(DescError::ServiceDecode(format!(
                "unknown processing_status: {other}"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ended)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub processing: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub errored: u64,
    #[serde(default)]
    pub canceled: u64,
    #[serde(default)]
    pub expired: u64,
}

impl RequestCounts {
    /// Everything that did not succeed.
    pub fn failed(&self) -> u64 {
        self.errored + self.canceled + self.expired
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub id: String,
    pub status: JobStatus,
    pub counts: RequestCounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOutcome {
    Succeeded { text: String },
    Errored { message: String },
    Canceled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub custom_id: String,
    pub outcome: ResultOutcome,
}

/// The three calls the pipeline needs from the batch service.
pub trait BatchClient: Send + Sync {
    fn submit(&self, requests: &[BatchRequest]) -> Result<BatchJob, DescError>;
    fn retrieve(&self, batch_id: &str) -> Result<BatchJob, DescError>;
    fn results(&self, batch_id: &str) -> Result<Vec<BatchResult>, DescError>;
}

#[derive(Deserialize)]
struct RawBatch {
    id: String,
    processing_status: String,
    #[serde(default)]
    request_counts: RequestCounts,
}

impl TryFrom<RawBatch> for BatchJob {
    type Error = DescError;

    fn try_from(raw: RawBatch) -> Result<Self, Self::Error> {
        Ok(BatchJob {
            status: JobStatus::parse(&raw.processing_status)?,
            id: raw.id,
            counts: raw.request_counts,
        })
    }
}

#[derive(Serialize)]
struct CreateBatchBody<'a> {
    requests: &'a [BatchRequest],
}

/// Decodes one JSONL line of a results download.
pub fn parse_result_line(line: &str) -> Result<BatchResult, DescError> {
    let raw: Value =
        serde_json::from_str(line).map_err(|err| DescError::ServiceDecode(err.to_string()))?;
    let custom_id = raw
        .get("custom_id")
        .and_then(Value::as_str)
        .ok_or_else(|| DescError::ServiceDecode("result without custom_id".to_string()))?
        .to_string();
    let result = raw
        .get("result")
        .ok_or_else(|| DescError::ServiceDecode(format!("result {custom_id} has no body")))?;
    let kind = result.get("type").and_then(Value::as_str).unwrap_or("");

    let outcome = match kind {
        "succeeded" => {
            // First content block only; it carries the text.
            let text = result
                .get("message")
                .and_then(|message| message.get("content"))
                .and_then(Value::as_array)
                .and_then(|blocks| blocks.first())
                .and_then(|block| block.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            ResultOutcome::Succeeded { text }
        }
        "errored" => ResultOutcome::Errored {
            message: result
                .get("error")
                .and_then(|error| error.get("error").or(Some(error)))
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
        "canceled" => ResultOutcome::Canceled,
        "expired" => ResultOutcome::Expired,
        other => {
            return Err(DescError::ServiceDecode(format!(
                "result {custom_id} has unknown type {other:?}"
            )));
        }
    };

    Ok(BatchResult { custom_id, outcome })
}

#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, DescError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("descgen/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DescError::InvalidConfig(err.to_string()))?,
        );
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| DescError::InvalidConfig("API key is not a valid header".to_string()))?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| DescError::ServiceHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn batches_url(&self) -> String {
        format!("{}/v1/messages/batches", self.base_url)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, DescError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "batch service request failed".to_string());
        Err(DescError::ServiceStatus { status, message })
    }

    /// Retries transient failures. Only used for reads that are safe to
    /// repeat; submission never goes through here.
    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, DescError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(DescError::ServiceHttp(err.to_string()));
                }
            }
        }
    }
}

impl BatchClient for AnthropicClient {
    fn submit(&self, requests: &[BatchRequest]) -> Result<BatchJob, DescError> {
        debug!(requests = requests.len(), "batch.submit");
        let response = self
            .client
            .post(self.batches_url())
            .json(&CreateBatchBody { requests })
            .send()
            .map_err(|err| DescError::ServiceHttp(err.to_string()))?;
        let raw: RawBatch = Self::handle_status(response)?
            .json()
            .map_err(|err| DescError::ServiceDecode(err.to_string()))?;
        raw.try_into()
    }

    fn retrieve(&self, batch_id: &str) -> Result<BatchJob, DescError> {
        debug!(batch_id, "batch.retrieve");
        let response = self
            .client
            .get(format!("{}/{batch_id}", self.batches_url()))
            .send()
            .map_err(|err| DescError::ServiceHttp(err.to_string()))?;
        let raw: RawBatch = Self::handle_status(response)?
            .json()
            .map_err(|err| DescError::ServiceDecode(err.to_string()))?;
        raw.try_into()
    }

    fn results(&self, batch_id: &str) -> Result<Vec<BatchResult>, DescError> {
        debug!(batch_id, "batch.results");
        let url = format!("{}/{batch_id}/results", self.batches_url());
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;

        let mut results = Vec::new();
        for line in BufReader::new(response).lines() {
            let line = line.map_err(|err| DescError::ServiceHttp(err.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            results.push(parse_result_line(&line)?);
        }
        Ok(results)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
