//! Types for the worker pool scaler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ticket::TicketId;

/// Errors from the scaler.
#[derive(Debug, Error)]
pub enum ScalerError {
    /// The agent process could not be started.
    #[error("failed to spawn agent {profile}: {message}")]
    SpawnFailure { profile: String, message: String },

    /// The agent command line was rejected before launch.
    #[error("invalid agent command: {0}")]
    InvalidCommand(String),

    /// Querying or signalling a worker process failed.
    #[error("worker process error: {0}")]
    Process(String),

    #[error("ticket store error: {0}")]
    TicketStore(#[from] crate::ticket::TicketError),
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub success: bool,
}

/// Lifecycle of a tracked worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Spawning,
    Running,
    Exited,
    Killed,
}

impl SlotState {
    /// Whether the slot still counts towards the pool size.
    pub fn is_live(&self) -> bool {
        matches!(self, SlotState::Spawning | SlotState::Running)
    }
}

/// A tracked worker, as reported by status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub profile: String,
    pub pid: u32,
    pub ticket_id: Option<TicketId>,
    pub state: SlotState,
    pub spawned_at: DateTime<Utc>,
}

/// A worker launched by a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnedWorker {
    pub worker_id: String,
    pub profile: String,
    pub pid: u32,
    pub ticket_id: TicketId,
}

/// What one tick observed and did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub pending: usize,
    pub desired: usize,
    /// Live workers after reaping, before spawning or killing.
    pub current: usize,
    pub reaped: Vec<String>,
    pub spawned: Option<SpawnedWorker>,
    /// Profile whose spawn failed this tick.
    pub spawn_failed: Option<String>,
    pub killed: Vec<String>,
}

/// Current state of the scaler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalerStatus {
    pub running: bool,
    pub max_workers: usize,
    pub pending: usize,
    pub workers: Vec<WorkerInfo>,
    pub disabled_profiles: Vec<String>,
}
