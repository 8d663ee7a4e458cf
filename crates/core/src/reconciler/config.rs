//! Reconciler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the orphan reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Run the background loop. When disabled, orphans are only reset on
    /// explicit calls.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often to look for dead claimants (milliseconds).
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    30_000 // 30 seconds
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_interval(),
        }
    }
}
