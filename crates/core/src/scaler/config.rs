//! Worker pool configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ticket::TicketKind;

/// Configuration for the worker pool scaler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    /// Run the background loop.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Hard cap on live workers across all profiles.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How often to compare backlog and pool size (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Disable a profile after this many spawn failures in a row.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    /// Bound on the ticket summary handed to a worker (characters).
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    /// Worker identity used while a ticket is reserved for a spawn.
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Server URL exported to workers as `SPAWNPOOL_SERVER_URL`.
    #[serde(default)]
    pub server_url: Option<String>,

    /// Agent profiles, tried in order.
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_workers() -> usize {
    3
}

fn default_tick_interval() -> u64 {
    15_000 // 15 seconds
}

fn default_max_failures() -> u32 {
    3
}

fn default_summary_max_chars() -> usize {
    500
}

fn default_identity() -> String {
    "spawnpool-scaler".to_string()
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_workers: default_max_workers(),
            tick_interval_ms: default_tick_interval(),
            max_consecutive_failures: default_max_failures(),
            summary_max_chars: default_summary_max_chars(),
            identity: default_identity(),
            server_url: None,
            agents: Vec::new(),
        }
    }
}

/// An external agent the scaler can launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,

    /// Executable to run. Resolved through PATH; never run through a shell.
    pub program: String,

    /// Arguments placed before the ticket summary.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the agent.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Only take tickets of this kind.
    #[serde(default)]
    pub kind: Option<TicketKind>,

    /// Cap on live workers of this profile.
    #[serde(default)]
    pub max_instances: Option<usize>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            kind: None,
            max_instances: None,
            enabled: true,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: TicketKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = Some(max);
        self
    }
}
