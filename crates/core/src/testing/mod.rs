//! Test doubles for the process, time and network seams.
//!
//! These let the claim, reconcile, scaling and backoff logic run in unit
//! and integration tests without real agents, brokers or waiting.
//!
//! # Example
//!
//! ```rust,ignore
//! use spawnpool_core::testing::{MockLauncher, StaticLiveness};
//!
//! let liveness = Arc::new(StaticLiveness::with_alive([101]));
//! let launcher = Arc::new(MockLauncher::new());
//! launcher.fail_next(1);
//! ```

mod manual_clock;
mod mock_launcher;
mod recording_notifier;
mod scripted_holder_status;
mod static_liveness;

pub use manual_clock::ManualClock;
pub use mock_launcher::MockLauncher;
pub use recording_notifier::RecordingNotifier;
pub use scripted_holder_status::ScriptedHolderStatus;
pub use static_liveness::StaticLiveness;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;
    use serde_json::json;

    use crate::ticket::{
        CreateTicketRequest, Priority, Ticket, TicketId, TicketKind, TicketStatus,
    };

    /// An open, unassigned defect.
    pub fn ticket(id: i64, title: &str, summary: &str) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: TicketId(id),
            kind: TicketKind::Defect,
            priority: Priority::default(),
            title: title.to_string(),
            summary: summary.to_string(),
            metadata: json!({}),
            status: TicketStatus::Open,
            assigned_to: None,
            worker_pid: None,
            created_by: "test".to_string(),
            resolution_note: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// A defect request with the given priority.
    pub fn defect(title: &str, priority: Priority) -> CreateTicketRequest {
        CreateTicketRequest::new(TicketKind::Defect, title, format!("Steps to reproduce {}", title))
            .with_priority(priority)
            .with_created_by("test")
    }

    /// A change request with default priority.
    pub fn change_request(title: &str) -> CreateTicketRequest {
        CreateTicketRequest::new(TicketKind::ChangeRequest, title, format!("Please {}", title))
            .with_created_by("test")
    }
}
