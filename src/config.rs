use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::DescError;

pub const DEFAULT_CONFIG_FILE: &str = "descgen.json";
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
pub const DEFAULT_MAX_TOKENS: u32 = 120;
/// Per-submission request limit of the batch API.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const MAX_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub collection_prefix: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: Utf8PathBuf,
    pub collection_prefix: String,
    pub model: String,
    pub max_tokens: u32,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub api_base_url: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            data_dir: Utf8PathBuf::from("data"),
            collection_prefix: "brands-".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `descgen.json` in the working directory when no path
    /// is given. A missing default file means "all defaults"; a missing
    /// explicit file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DescError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| DescError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| DescError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DescError> {
        let defaults = ResolvedConfig::default();
        let batch_size = config.batch_size.unwrap_or(defaults.batch_size);
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(DescError::InvalidConfig(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }

        let poll_interval_secs = config
            .poll_interval_secs
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(DescError::InvalidConfig(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }

        let max_tokens = config.max_tokens.unwrap_or(defaults.max_tokens);
        if max_tokens == 0 {
            return Err(DescError::InvalidConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }

        let model = config
            .model
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.model);

        Ok(ResolvedConfig {
            data_dir: config
                .data_dir
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.data_dir),
            collection_prefix: config
                .collection_prefix
                .unwrap_or(defaults.collection_prefix),
            model,
            max_tokens,
            batch_size,
            poll_interval: Duration::from_secs(poll_interval_secs),
            api_base_url: config
                .api_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
        })
    }
}

impl ResolvedConfig {
    pub fn with_data_dir(mut self, data_dir: Option<&Utf8Path>) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = dir.to_path_buf();
        }
        self
    }
}

/// Loads `.env` from the working directory (variables already set win) and
/// returns the API key.
pub fn load_api_key() -> Result<String, DescError> {
    let _ = dotenvy::dotenv();
    api_key_from(std::env::var(API_KEY_VAR).ok())
}

pub fn api_key_from(value: Option<String>) -> Result<String, DescError> {
    value
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or(DescError::MissingApiKey)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_resolve() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(resolved.model, DEFAULT_MODEL);
        assert_eq!(resolved.data_dir, Utf8PathBuf::from("data"));
        assert_eq!(resolved.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = Config {
            batch_size: Some(0),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, DescError::InvalidConfig(_));
    }

    #[test]
    fn blank_api_key_is_missing() {
        assert_matches!(api_key_from(Some("  ".to_string())), Err(DescError::MissingApiKey));
        assert_matches!(api_key_from(None), Err(DescError::MissingApiKey));
        assert_eq!(api_key_from(Some(" sk-ant-x ".to_string())).unwrap(), "sk-ant-x");
    }
}
