//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STATE_DIR: &str = ".dreamflow";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_ADD_DEBOUNCE_MS: u64 = 750;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base URL '{0}': expected an http:// or https:// URL")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub state_dir: PathBuf,
    pub timeouts: HttpTimeouts,
    /// Upper bound on a task collection fetch before the list degrades to empty.
    pub fetch_timeout: Duration,
    /// Window in which re-adding the same title is treated as a double submit.
    pub add_debounce: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            timeouts: HttpTimeouts {
                request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            add_debounce: Duration::from_millis(DEFAULT_ADD_DEBOUNCE_MS),
        }
    }
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `DREAMFLOW_BASE_URL`: API base URL (default `http://127.0.0.1:8000`)
    /// - `DREAMFLOW_STATE_DIR`: session store directory (default `.dreamflow`)
    /// - `DREAMFLOW_REQUEST_TIMEOUT_SECS`: default 15
    /// - `DREAMFLOW_CONNECT_TIMEOUT_SECS`: default 5
    /// - `DREAMFLOW_FETCH_TIMEOUT_SECS`: default 10
    /// - `DREAMFLOW_ADD_DEBOUNCE_MS`: default 750
    ///
    /// # Errors
    ///
    /// Returns an error if `DREAMFLOW_BASE_URL` is set to something that is
    /// not an http(s) URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = normalize_base_url(
            &std::env::var("DREAMFLOW_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned()),
        )?;
        let state_dir = std::env::var("DREAMFLOW_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR));
        let timeouts = HttpTimeouts {
            request_secs: env_parse_u64("DREAMFLOW_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("DREAMFLOW_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let fetch_timeout =
            Duration::from_secs(env_parse_u64("DREAMFLOW_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS));
        let add_debounce = Duration::from_millis(env_parse_u64("DREAMFLOW_ADD_DEBOUNCE_MS", DEFAULT_ADD_DEBOUNCE_MS));

        Ok(Self { base_url, state_dir, timeouts, fetch_timeout, add_debounce })
    }

    /// Replace the base URL, applying the same validation as `from_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not an http(s) URL.
    pub fn with_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(raw)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }
}

pub(crate) fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let has_scheme = trimmed.starts_with("http://") || trimmed.starts_with("https://");
    let has_host = trimmed.split_once("://").is_some_and(|(_, rest)| !rest.is_empty());
    if !has_scheme || !has_host {
        return Err(ConfigError::InvalidBaseUrl(raw.to_owned()));
    }
    Ok(trimmed.to_owned())
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
