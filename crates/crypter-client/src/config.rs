//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so an engine can be built with zero
//! configuration against a local API.

use std::path::PathBuf;
use std::time::Duration;

use crypter_shared::constants::{
    DEFAULT_API_URL, DEFAULT_BATCH_SIZE, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_PENDING_READ_TTL_SECS,
};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    /// Env: `CRYPTER_API_URL`
    /// Default: `http://localhost:8080`
    pub api_url: String,

    /// Bearer token sent with every REST request.
    /// Env: `CRYPTER_API_TOKEN`
    /// Default: none (anonymous).
    pub api_token: Option<String>,

    /// Page size used when the caller does not pass one.
    /// Env: `CRYPTER_BATCH_SIZE`
    /// Default: `20`
    pub batch_size: usize,

    /// Location of the local store.
    /// Env: `CRYPTER_DB_PATH`
    /// Default: none, meaning the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Per-request HTTP timeout.
    /// Env: `CRYPTER_HTTP_TIMEOUT_SECS`
    /// Default: 30 seconds.
    pub http_timeout: Duration,

    /// How long a read receipt for an unknown message is kept.
    /// Env: `CRYPTER_PENDING_READ_TTL_SECS`
    /// Default: 300 seconds.
    pub pending_read_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            batch_size: DEFAULT_BATCH_SIZE,
            db_path: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            pending_read_ttl: Duration::from_secs(DEFAULT_PENDING_READ_TTL_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CRYPTER_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(token) = lookup("CRYPTER_API_TOKEN") {
            if !token.is_empty() {
                config.api_token = Some(token);
            }
        }

        if let Some(value) = lookup("CRYPTER_BATCH_SIZE") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => config.batch_size = n,
                _ => {
                    tracing::warn!(value = %value, "Invalid CRYPTER_BATCH_SIZE, using default");
                }
            }
        }

        if let Some(path) = lookup("CRYPTER_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup("CRYPTER_HTTP_TIMEOUT_SECS") {
            match value.parse::<u64>() {
                Ok(secs) if secs > 0 => config.http_timeout = Duration::from_secs(secs),
                _ => {
                    tracing::warn!(
                        value = %value,
                        "Invalid CRYPTER_HTTP_TIMEOUT_SECS, using default"
                    );
                }
            }
        }

        if let Some(value) = lookup("CRYPTER_PENDING_READ_TTL_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => config.pending_read_ttl = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(
                        value = %value,
                        "Invalid CRYPTER_PENDING_READ_TTL_SECS, using default"
                    );
                }
            }
        }

        config
    }
}
