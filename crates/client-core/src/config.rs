use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config_env::{optional_trimmed_env, parse_u32_env, parse_u64_env};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SCAN_POLL_MAX_ATTEMPTS: u32 = 30;
const DEFAULT_SCAN_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_CREDENTIALS_PATH: &str = ".skin-consultant/credentials.json";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub scan_poll_max_attempts: u32,
    pub scan_poll_interval_ms: u64,
    pub user_location: Option<String>,
    pub credentials_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

/// Loads `.env` from the working directory when one exists.
pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = optional_trimmed_env("SKIN_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        Ok(Self {
            api_base_url: validate_base_url(&api_base_url)?,
            request_timeout_ms: parse_u64_env("SKIN_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
            upload_timeout_ms: parse_u64_env("SKIN_UPLOAD_TIMEOUT_MS", DEFAULT_UPLOAD_TIMEOUT_MS)?,
            connect_timeout_ms: parse_u64_env("SKIN_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)?,
            scan_poll_max_attempts: parse_u32_env(
                "SKIN_SCAN_POLL_MAX_ATTEMPTS",
                DEFAULT_SCAN_POLL_MAX_ATTEMPTS,
            )?,
            scan_poll_interval_ms: parse_u64_env(
                "SKIN_SCAN_POLL_INTERVAL_MS",
                DEFAULT_SCAN_POLL_INTERVAL_MS,
            )?,
            user_location: optional_trimmed_env("SKIN_USER_LOCATION"),
            credentials_path: optional_trimmed_env("SKIN_CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH)),
        })
    }

    /// Configuration pointing at `api_base_url` with every other knob at its default.
    pub fn for_base_url(api_base_url: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base_url: validate_base_url(&api_base_url.into())?,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            upload_timeout_ms: DEFAULT_UPLOAD_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            scan_poll_max_attempts: DEFAULT_SCAN_POLL_MAX_ATTEMPTS,
            scan_poll_interval_ms: DEFAULT_SCAN_POLL_INTERVAL_MS,
            user_location: None,
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|err| {
        ConfigError::InvalidConfiguration(format!("SKIN_API_BASE_URL is not a valid url: {err}"))
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::InvalidConfiguration(
            "SKIN_API_BASE_URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::ClientConfig;

    #[test]
    fn base_url_drops_trailing_slash() {
        let config = ClientConfig::for_base_url("http://10.0.2.2:8000/").expect("valid url");
        assert_eq!(config.api_base_url, "http://10.0.2.2:8000");
        assert_eq!(config.scan_poll_max_attempts, 30);
        assert_eq!(config.upload_timeout().as_secs(), 30);
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(ClientConfig::for_base_url("ftp://example.com").is_err());
        assert!(ClientConfig::for_base_url("not a url").is_err());
    }
}
