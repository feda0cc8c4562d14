use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::poll::{PollConfig, PollDelays};
use crate::retry::RetryPolicy;

pub const ENV_BASE_URL: &str = "SWARMDECK_BASE_URL";
pub const ENV_API_KEY: &str = "SWARMDECK_API_KEY";
pub const ENV_PUSH_PATH: &str = "SWARMDECK_PUSH_PATH";
pub const ENV_MAX_RETRIES: &str = "SWARMDECK_MAX_RETRIES";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("unsupported scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Settings for the realtime layer.
///
/// Every field has a default so a partial JSON document (or none at all)
/// yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_push_path")]
    pub push_path: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
    #[serde(default = "default_poll_fast_ms")]
    pub poll_fast_ms: u64,
    #[serde(default = "default_poll_medium_ms")]
    pub poll_medium_ms: u64,
    #[serde(default = "default_poll_slow_ms")]
    pub poll_slow_ms: u64,
    #[serde(default = "default_poll_degraded_after")]
    pub poll_degraded_after: u32,
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    #[serde(default = "default_health_slow_threshold_ms")]
    pub health_slow_threshold_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            push_path: default_push_path(),
            api_key: None,
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            retry_jitter: default_retry_jitter(),
            poll_fast_ms: default_poll_fast_ms(),
            poll_medium_ms: default_poll_medium_ms(),
            poll_slow_ms: default_poll_slow_ms(),
            poll_degraded_after: default_poll_degraded_after(),
            health_interval_ms: default_health_interval_ms(),
            health_slow_threshold_ms: default_health_slow_threshold_ms(),
        }
    }
}

impl SyncConfig {
    /// Defaults overlaid with `SWARMDECK_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config.base_url = base_url.trim().to_string();
        }
        if let Some(api_key) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
            config.api_key = Some(api_key.trim().to_string());
        }
        if let Some(push_path) = lookup(ENV_PUSH_PATH).filter(|v| !v.trim().is_empty()) {
            config.push_path = push_path.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: ENV_MAX_RETRIES.to_string(),
                reason: format!("{e}"),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: "base url cannot be empty".to_string(),
            });
        }
        self.parsed_base_url()?;
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ConfigError::InvalidValue {
                key: "retryJitter".to_string(),
                reason: format!("{} is outside [0, 1]", self.retry_jitter),
            });
        }
        for (key, value) in [
            ("retryBaseMs", self.retry_base_ms),
            ("retryCapMs", self.retry_cap_ms),
            ("pollFastMs", self.poll_fast_ms),
            ("pollMediumMs", self.poll_medium_ms),
            ("pollSlowMs", self.poll_slow_ms),
            ("healthIntervalMs", self.health_interval_ms),
            ("requestTimeoutMs", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
        }
        if self.poll_degraded_after == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pollDegradedAfter".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(self.base_url.trim()).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })
    }

    /// Base URL without a trailing slash, for REST paths.
    pub fn api_base(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }

    /// Push-channel address derived from the base URL's origin:
    /// `http` maps to `ws`, `https` to `wss`, host and port are kept.
    pub fn push_url(&self) -> Result<String, ConfigError> {
        let base = self.parsed_base_url()?;
        let scheme = match base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        let host = base.host_str().ok_or_else(|| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: "missing host".to_string(),
        })?;
        let authority = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let path = if self.push_path.starts_with('/') {
            self.push_path.clone()
        } else {
            format!("/{}", self.push_path)
        };
        Ok(format!("{scheme}://{authority}{path}"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_cap_ms),
            self.retry_jitter,
        )
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            delays: PollDelays {
                fast: Duration::from_millis(self.poll_fast_ms),
                medium: Duration::from_millis(self.poll_medium_ms),
                slow: Duration::from_millis(self.poll_slow_ms),
            },
            degraded_after: self.poll_degraded_after,
        }
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn health_slow_threshold(&self) -> Duration {
        Duration::from_millis(self.health_slow_threshold_ms)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_push_path() -> String {
    "/ws".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    15
}

fn default_retry_base_ms() -> u64 {
    crate::retry::RETRY_BASE_DELAY_MS
}

fn default_retry_cap_ms() -> u64 {
    crate::retry::RETRY_MAX_DELAY_MS
}

fn default_retry_jitter() -> f64 {
    crate::retry::RETRY_JITTER_RATIO
}

fn default_poll_fast_ms() -> u64 {
    1_500
}

fn default_poll_medium_ms() -> u64 {
    3_000
}

fn default_poll_slow_ms() -> u64 {
    5_000
}

fn default_poll_degraded_after() -> u32 {
    3
}

fn default_health_interval_ms() -> u64 {
    30_000
}

fn default_health_slow_threshold_ms() -> u64 {
    2_000
}
