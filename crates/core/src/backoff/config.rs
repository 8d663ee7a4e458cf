//! Conflict backoff configuration.

use serde::{Deserialize, Serialize};

/// Configuration for waiting on a resource held by another process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// How often to ask for the holder's status (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Give up after waiting this long (milliseconds).
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,

    /// Request timeout for remote status and lock calls (seconds).
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_max_wait() -> u64 {
    900_000 // 15 minutes
}

fn default_http_timeout() -> u64 {
    10
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_wait_ms: default_max_wait(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}
