//! Event layer configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Redis URL for pub/sub (e.g. "redis://127.0.0.1:6379").
    /// When unset or unreachable, subscribers poll the ticket store.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for broker channel names.
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// How long to wait for the broker at startup (milliseconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Polling fallback interval (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_channel_prefix() -> String {
    "spawnpool".to_string()
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_poll_interval() -> u64 {
    10_000 // 10 seconds
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel_prefix: default_channel_prefix(),
            connect_timeout_ms: default_connect_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}
