//! Types for the orphan reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ticket::TicketId;

/// Errors that abort a reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("ticket store error: {0}")]
    TicketStore(#[from] crate::ticket::TicketError),

    #[error("lock store error: {0}")]
    LockStore(#[from] crate::lock::LockError),
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Claimed tickets inspected.
    pub checked: usize,
    /// Tickets reset to open because their worker died.
    pub tickets_rescued: Vec<TicketId>,
    /// Lock resources freed because their holder died.
    pub locks_released: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.tickets_rescued.is_empty() && self.locks_released.is_empty()
    }
}

/// Current state of the reconciler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcilerStatus {
    pub running: bool,
    pub interval_ms: u64,
    /// Tickets rescued since start.
    pub total_rescued: u64,
    pub last_run: Option<ReconcileReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_is_clean() {
        let mut report = ReconcileReport {
            checked: 2,
            tickets_rescued: vec![],
            locks_released: vec![],
            finished_at: Utc::now(),
        };
        assert!(report.is_clean());

        report.tickets_rescued.push(TicketId(1));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_status_default() {
        let status = ReconcilerStatus::default();
        assert!(!status.running);
        assert!(status.last_run.is_none());
    }
}
