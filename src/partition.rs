use std::fs;

use camino::Utf8Path;

use crate::batch::{BatchRequest, Message, RequestParams};
use crate::domain::{Chunk, Record};
use crate::error::DescError;
use crate::store::{Store, write_bytes_atomic};

#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub model: String,
    pub max_tokens: u32,
}

pub fn build_prompt(record: &Record) -> String {
    let first = record
        .categories()
        .first()
        .map(String::as_str)
        .unwrap_or("retail");
    let second = record
        .categories()
        .get(1)
        .map(|category| format!(" and {category}"))
        .unwrap_or_default();
    format!(
        "{} ({}) is a {first}{second} brand. \
         Write exactly 2 sentences: what they sell, and what makes them notable \
         or who they're for. Reply with only the 2 sentences, no preamble.",
        record.display_name(),
        record.domain.as_deref().unwrap_or_default(),
    )
}

pub fn build_request(record: &Record, settings: &RequestSettings) -> BatchRequest {
    BatchRequest {
        custom_id: record.slug.clone(),
        params: RequestParams {
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: build_prompt(record),
            }],
        },
    }
}

/// Splits `records` into consecutive slices of at most `limit`.
pub fn partition(records: &[Record], limit: usize) -> Result<Vec<&[Record]>, DescError> {
    if limit == 0 {
        return Err(DescError::InvalidConfig(
            "chunk size limit must be positive".to_string(),
        ));
    }
    Ok(records.chunks(limit).collect())
}

/// One compact JSON request per line, newline terminated.
pub fn render_request_file(
    records: &[Record],
    settings: &RequestSettings,
) -> Result<Vec<u8>, DescError> {
    let mut out = Vec::new();
    for record in records {
        let request = build_request(record, settings);
        serde_json::to_writer(&mut out, &request)
            .map_err(|err| DescError::Filesystem(err.to_string()))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Writes one request file per chunk and returns the fresh `pending` chunks.
pub fn write_chunks(
    store: &Store,
    records: &[Record],
    limit: usize,
    settings: &RequestSettings,
) -> Result<Vec<Chunk>, DescError> {
    partition(records, limit)?
        .into_iter()
        .enumerate()
        .map(|(index, slice)| {
            let path = store.request_path(index);
            write_bytes_atomic(&path, &render_request_file(slice, settings)?)?;
            Ok(Chunk::new(index, path, slice.len()))
        })
        .collect()
}

pub fn read_request_file(path: &Utf8Path) -> Result<Vec<BatchRequest>, DescError> {
    let content = fs::read_to_string(path.as_std_path()).map_err(|err| DescError::RequestFile {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|err| DescError::RequestFile {
                path: path.to_path_buf(),
                message: format!("line {}: {err}", number + 1),
            })
        })
        .collect()
}
