//! Types for the resource lock manager.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of the resource lock table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLockSlot {
    pub resource: String,
    pub holder_task_id: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub holder_pid: Option<u32>,
}

impl ResourceLockSlot {
    pub fn is_held(&self) -> bool {
        self.holder_task_id.is_some()
    }

    /// How long the current holder has had the slot. Zero if the
    /// acquisition time lies in the future.
    pub fn held_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.acquired_at
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }
}

/// The resource is held by another task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockBusy {
    pub resource: String,
    pub holder_task_id: String,
    pub held_for: Duration,
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The slot was free (or already ours).
    Acquired,
    /// The previous holder exceeded the tier timeout and was displaced.
    Reclaimed {
        previous_holder: String,
        held_for: Duration,
    },
    /// A fresh holder owns the slot.
    Busy(LockBusy),
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        !matches!(self, LockOutcome::Busy(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            LockOutcome::Acquired => "acquired",
            LockOutcome::Reclaimed { .. } => "reclaimed",
            LockOutcome::Busy(_) => "busy",
        }
    }
}

/// Errors from the lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("resource {} is held by {}", .0.resource, .0.holder_task_id)]
    Busy(LockBusy),

    #[error("lock store error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for LockError {
    fn from(e: rusqlite::Error) -> Self {
        LockError::Database(e.to_string())
    }
}
