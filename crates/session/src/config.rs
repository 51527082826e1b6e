//! Session configuration (environment-driven).

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TOKEN_TTL_DAYS: u32 = 7;
/// Longest accepted token lifetime (ten years).
pub const MAX_TOKEN_TTL_DAYS: u32 = 3650;

/// Settings for a session client process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base URL of the remote authority.
    pub api_url: String,
    /// Upper bound on every remote call.
    pub request_timeout: Duration,
    /// Client-visible token lifetime.
    pub token_ttl_days: u32,
    /// Location of the persisted token.
    pub token_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            token_ttl_days: DEFAULT_TOKEN_TTL_DAYS,
            token_path: default_token_path(),
        }
    }
}

impl SessionConfig {
    /// Read `SCHOLARIS_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults and
    /// unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SCHOLARIS_API_URL").filter(|v| !v.trim().is_empty()) {
            config.api_url = url.trim().to_string();
        } else {
            tracing::debug!("SCHOLARIS_API_URL not set; using {}", DEFAULT_API_URL);
        }

        if let Some(raw) = lookup("SCHOLARIS_REQUEST_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.request_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(
                    value = %raw,
                    "invalid SCHOLARIS_REQUEST_TIMEOUT_MS; using {:?}",
                    DEFAULT_REQUEST_TIMEOUT
                ),
            }
        }

        if let Some(raw) = lookup("SCHOLARIS_TOKEN_TTL_DAYS") {
            match raw.trim().parse::<u32>() {
                Ok(days) if (1..=MAX_TOKEN_TTL_DAYS).contains(&days) => {
                    config.token_ttl_days = days
                }
                _ => tracing::warn!(
                    value = %raw,
                    "invalid SCHOLARIS_TOKEN_TTL_DAYS; using {}",
                    DEFAULT_TOKEN_TTL_DAYS
                ),
            }
        }

        if let Some(path) = lookup("SCHOLARIS_TOKEN_PATH").filter(|v| !v.trim().is_empty()) {
            config.token_path = PathBuf::from(path);
        }

        config
    }
}

/// `<local data dir>/scholaris/session.json`, or the working directory when
/// the platform has no data dir.
pub fn default_token_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scholaris")
        .join("session.json")
}
