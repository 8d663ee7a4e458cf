//! Types for the conflict backoff protocol.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::LockBusy;

/// A resource another task holds. Raised by local and remote acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBusy {
    pub resource: String,
    pub holder_task_id: String,
}

impl ResourceBusy {
    pub fn new(resource: impl Into<String>, holder_task_id: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            holder_task_id: holder_task_id.into(),
        }
    }
}

impl From<LockBusy> for ResourceBusy {
    fn from(busy: LockBusy) -> Self {
        Self {
            resource: busy.resource,
            holder_task_id: busy.holder_task_id,
        }
    }
}

impl fmt::Display for ResourceBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is held by {}", self.resource, self.holder_task_id)
    }
}

/// What a lock holder is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolderStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    /// The holder no longer owns any lock.
    Released,
    #[serde(other)]
    Unknown,
}

impl HolderStatus {
    /// The holder is done and its resource can be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HolderStatus::Completed
                | HolderStatus::Failed
                | HolderStatus::Cancelled
                | HolderStatus::Released
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HolderStatus::Running => "running",
            HolderStatus::Completed => "completed",
            HolderStatus::Failed => "failed",
            HolderStatus::Cancelled => "cancelled",
            HolderStatus::Released => "released",
            HolderStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HolderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from waiting on a conflicting holder.
#[derive(Debug, Error)]
pub enum BackoffError {
    /// The holder did not finish in time. The caller may try again later.
    #[error("{resource} still held by {holder_task_id} after {waited:?}")]
    ConflictTimeout {
        resource: String,
        holder_task_id: String,
        waited: Duration,
    },

    /// The waiting task was cancelled.
    #[error("cancelled while waiting for {resource}")]
    Cancelled { resource: String },

    /// The retried operation failed.
    #[error("retried operation failed: {0}")]
    Operation(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The holder status could not be determined.
    #[error("holder status unavailable: {0}")]
    Status(String),

    /// A remote lock call failed.
    #[error("remote lock error: {0}")]
    Remote(String),
}

impl BackoffError {
    /// Whether the caller should try again later rather than fail.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackoffError::ConflictTimeout { .. })
    }
}

/// Source of truth for a lock holder's progress.
#[async_trait]
pub trait HolderStatusSource: Send + Sync {
    async fn holder_status(&self, task_id: &str) -> Result<HolderStatus, BackoffError>;
}

/// Checked before every poll of the holder.
pub trait CancellationCheck: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancellationCheck for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// A task that cannot be cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancelled;

impl CancellationCheck for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!HolderStatus::Running.is_terminal());
        assert!(!HolderStatus::Unknown.is_terminal());
        assert!(HolderStatus::Completed.is_terminal());
        assert!(HolderStatus::Failed.is_terminal());
        assert!(HolderStatus::Cancelled.is_terminal());
        assert!(HolderStatus::Released.is_terminal());
    }

    #[test]
    fn test_unrecognized_status_is_unknown() {
        let status: HolderStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, HolderStatus::Unknown);
    }

    #[test]
    fn test_only_timeout_is_retryable() {
        let timeout = BackoffError::ConflictTimeout {
            resource: "video".to_string(),
            holder_task_id: "task-1".to_string(),
            waited: Duration::from_secs(900),
        };
        assert!(timeout.is_retryable());
        assert!(!BackoffError::Cancelled {
            resource: "video".to_string()
        }
        .is_retryable());
        assert!(!BackoffError::Status("down".to_string()).is_retryable());
    }

    #[test]
    fn test_busy_from_lock_busy() {
        let busy: ResourceBusy = LockBusy {
            resource: "image".to_string(),
            holder_task_id: "task-9".to_string(),
            held_for: Duration::from_secs(5),
        }
        .into();
        assert_eq!(busy, ResourceBusy::new("image", "task-9"));
        assert_eq!(busy.to_string(), "image is held by task-9");
    }

    #[test]
    fn test_atomic_cancellation() {
        let flag = AtomicBool::new(false);
        assert!(!flag.is_cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(flag.is_cancelled());
    }
}
