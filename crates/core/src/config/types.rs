use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::backoff::BackoffConfig;
use crate::lock::LockConfig;
use crate::notify::NotifierConfig;
use crate::reconciler::ReconcilerConfig;
use crate::scaler::ScalerConfig;
use crate::ticket::TicketKind;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub scaler: ScalerConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// How long a writer waits for the database lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("spawnpool.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub reconciler: ReconcilerConfig,
    pub scaler: SanitizedScalerConfig,
    pub locks: LockConfig,
    pub backoff: BackoffConfig,
    pub notifier: SanitizedNotifierConfig,
}

/// Scaler config with agent environment values hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedScalerConfig {
    pub enabled: bool,
    pub max_workers: usize,
    pub tick_interval_ms: u64,
    pub max_consecutive_failures: u32,
    pub summary_max_chars: usize,
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    pub agents: Vec<SanitizedAgentProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAgentProfile {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Names only.
    pub env: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<TicketKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<usize>,
    pub enabled: bool,
}

/// Notifier config with broker credentials redacted
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedNotifierConfig {
    pub broker_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    pub channel_prefix: String,
    pub connect_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

/// Replace the userinfo part of a URL, if any, with `***`.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());

    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let scaler = &config.scaler;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            reconciler: config.reconciler.clone(),
            scaler: SanitizedScalerConfig {
                enabled: scaler.enabled,
                max_workers: scaler.max_workers,
                tick_interval_ms: scaler.tick_interval_ms,
                max_consecutive_failures: scaler.max_consecutive_failures,
                summary_max_chars: scaler.summary_max_chars,
                identity: scaler.identity.clone(),
                server_url: scaler.server_url.as_deref().map(redact_url),
                agents: scaler
                    .agents
                    .iter()
                    .map(|a| SanitizedAgentProfile {
                        name: a.name.clone(),
                        program: a.program.clone(),
                        args: a.args.clone(),
                        env: a.env.keys().cloned().collect(),
                        kind: a.kind,
                        max_instances: a.max_instances,
                        enabled: a.enabled,
                    })
                    .collect(),
            },
            locks: config.locks.clone(),
            backoff: config.backoff.clone(),
            notifier: SanitizedNotifierConfig {
                broker_configured: config.notifier.redis_url.is_some(),
                redis_url: config.notifier.redis_url.as_deref().map(redact_url),
                channel_prefix: config.notifier.channel_prefix.clone(),
                connect_timeout_ms: config.notifier.connect_timeout_ms,
                poll_interval_ms: config.notifier.poll_interval_ms,
            },
        }
    }
}
