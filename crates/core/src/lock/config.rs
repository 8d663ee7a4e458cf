//! Resource lock configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a holder may keep a resource before it is presumed abandoned.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockTier {
    /// Short stages (script generation, uploads).
    #[default]
    Short,
    /// Long stages (image and video rendering).
    Long,
}

/// A lockable resource slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(default)]
    pub tier: LockTier,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, tier: LockTier) -> Self {
        Self {
            name: name.into(),
            tier,
        }
    }
}

/// Configuration for the resource lock manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Zombie timeout for short-tier resources (seconds).
    #[serde(default = "default_short_timeout")]
    pub short_timeout_secs: u64,

    /// Zombie timeout for long-tier resources (seconds).
    #[serde(default = "default_long_timeout")]
    pub long_timeout_secs: u64,

    /// Resource slots. One row per entry is created at startup.
    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceSpec>,
}

fn default_short_timeout() -> u64 {
    600 // 10 minutes
}

fn default_long_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_resources() -> Vec<ResourceSpec> {
    vec![
        ResourceSpec::new("script", LockTier::Short),
        ResourceSpec::new("image", LockTier::Long),
        ResourceSpec::new("video", LockTier::Long),
        ResourceSpec::new("upload", LockTier::Short),
    ]
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            short_timeout_secs: default_short_timeout(),
            long_timeout_secs: default_long_timeout(),
            resources: default_resources(),
        }
    }
}

impl LockConfig {
    /// Zombie timeout for `resource`, or None if the resource is not configured.
    pub fn timeout_for(&self, resource: &str) -> Option<Duration> {
        self.resources
            .iter()
            .find(|spec| spec.name == resource)
            .map(|spec| match spec.tier {
                LockTier::Short => Duration::from_secs(self.short_timeout_secs),
                LockTier::Long => Duration::from_secs(self.long_timeout_secs),
            })
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|spec| spec.name.as_str()).collect()
    }
}
