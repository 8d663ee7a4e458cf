//! Ticket storage trait and types.
//!
//! All mutation of the ticket table goes through [`TicketStore`]; callers never
//! issue their own conditional updates.

use std::fmt;

use crate::ticket::{ClaimedTicket, Priority, Ticket, TicketId, TicketKind, TicketStatus};

/// Maximum characters kept from an error message in failure history.
pub const MAX_FAILURE_MESSAGE_CHARS: usize = 500;

/// Error type for ticket operations.
#[derive(Debug)]
pub enum TicketError {
    /// Ticket not found.
    NotFound(TicketId),
    /// Ticket is resolved, closed or cancelled; no further updates allowed.
    AlreadyTerminal {
        ticket_id: TicketId,
        status: TicketStatus,
    },
    /// The caller is not the ticket's current assignee.
    AssignedToOther {
        ticket_id: TicketId,
        current: String,
    },
    /// An active ticket with the same title already exists.
    DuplicateTicket { existing_id: TicketId },
    /// Status value not accepted for this operation.
    InvalidStatus {
        ticket_id: TicketId,
        status: TicketStatus,
        operation: String,
    },
    /// Database error.
    Database(String),
}

impl fmt::Display for TicketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketError::NotFound(id) => write!(f, "Ticket not found: {}", id),
            TicketError::AlreadyTerminal { ticket_id, status } => {
                write!(f, "Ticket {} is already {}", ticket_id, status)
            }
            TicketError::AssignedToOther { ticket_id, current } => {
                write!(f, "Ticket {} is assigned to {}", ticket_id, current)
            }
            TicketError::DuplicateTicket { existing_id } => {
                write!(f, "Duplicate ticket, existing ticket is {}", existing_id)
            }
            TicketError::InvalidStatus {
                ticket_id,
                status,
                operation,
            } => write!(
                f,
                "Cannot {} ticket {}: status {} not allowed",
                operation, ticket_id, status
            ),
            TicketError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for TicketError {}

impl TicketError {
    /// Conflicts the caller may resolve by retrying or re-reading.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            TicketError::AlreadyTerminal { .. }
                | TicketError::AssignedToOther { .. }
                | TicketError::DuplicateTicket { .. }
        )
    }
}

impl From<rusqlite::Error> for TicketError {
    fn from(e: rusqlite::Error) -> Self {
        TicketError::Database(e.to_string())
    }
}

/// Request to create a new ticket.
#[derive(Debug, Clone)]
pub struct CreateTicketRequest {
    /// Explicit id; creation is idempotent when set.
    pub id: Option<TicketId>,
    pub kind: TicketKind,
    pub priority: Priority,
    pub title: String,
    pub summary: String,
    /// Must be a JSON object; anything else is wrapped under `"value"`.
    pub metadata: serde_json::Value,
    /// Producer submitting the ticket (operator, log watcher, parser).
    pub created_by: String,
}

impl CreateTicketRequest {
    pub fn new(kind: TicketKind, title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            priority: Priority::default(),
            title: title.into(),
            summary: summary.into(),
            metadata: serde_json::Value::Object(Default::default()),
            created_by: "anonymous".to_string(),
        }
    }

    pub fn with_id(mut self, id: TicketId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }
}

/// Filter for querying tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    /// Filter by status (None = all statuses).
    pub status: Option<TicketStatus>,
    /// Filter by kind.
    pub kind: Option<TicketKind>,
    /// Filter by assignee.
    pub assigned_to: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
    /// Sort order of `list`.
    pub order: TicketOrder,
}

/// Sort order for listing tickets. Both are newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TicketOrder {
    #[default]
    Created,
    Updated,
}

impl TicketOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            TicketOrder::Created => "created_at DESC, id DESC",
            TicketOrder::Updated => "updated_at DESC, id DESC",
        }
    }
}

impl TicketFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            kind: None,
            assigned_to: None,
            limit: 100,
            offset: 0,
            order: TicketOrder::default(),
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by kind.
    pub fn with_kind(mut self, kind: TicketKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Filter by assignee.
    pub fn with_assigned_to(mut self, worker_id: impl Into<String>) -> Self {
        self.assigned_to = Some(worker_id.into());
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Sort by last update instead of creation.
    pub fn with_order(mut self, order: TicketOrder) -> Self {
        self.order = order;
        self
    }
}

/// Trait for ticket storage backends.
///
/// Every mutating method is a single atomic operation against the store.
pub trait TicketStore: Send + Sync {
    /// Create a ticket. Idempotent per explicit id; an active ticket with the
    /// same title yields [`TicketError::DuplicateTicket`].
    fn create(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError>;

    /// Get a ticket by id.
    fn get(&self, id: TicketId) -> Result<Option<Ticket>, TicketError>;

    /// List tickets matching the filter, newest first by the filter's order.
    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError>;

    /// Count tickets matching the filter (limit/offset ignored).
    fn count(&self, filter: &TicketFilter) -> Result<i64, TicketError>;

    /// Count open, unassigned tickets.
    fn count_claimable(&self, kind: Option<TicketKind>) -> Result<i64, TicketError>;

    /// Claim the next open ticket by priority then age.
    ///
    /// Returns `Ok(None)` when nothing is claimable.
    fn claim(
        &self,
        worker_id: &str,
        worker_pid: u32,
        kind: Option<TicketKind>,
    ) -> Result<Option<Ticket>, TicketError>;

    /// Update the status of a ticket on behalf of its assignee.
    fn set_status(
        &self,
        id: TicketId,
        worker_id: &str,
        status: TicketStatus,
        note: Option<&str>,
    ) -> Result<Ticket, TicketError>;

    /// Return a claimed ticket to the queue, recording `error` in its failure
    /// history. Returns false if the ticket is not held by `worker_id`.
    fn release(
        &self,
        id: TicketId,
        worker_id: &str,
        error: Option<&str>,
    ) -> Result<bool, TicketError>;

    /// Move a reservation from `from_worker` to a spawned process.
    fn hand_over(
        &self,
        id: TicketId,
        from_worker: &str,
        to_worker: &str,
        worker_pid: u32,
    ) -> Result<bool, TicketError>;

    /// Operator stop. Clears the pid so the reconciler leaves the ticket alone.
    fn cancel(&self, id: TicketId, reason: Option<&str>) -> Result<Ticket, TicketError>;

    /// All `in_progress` tickets that carry a worker pid.
    fn list_claimed(&self) -> Result<Vec<ClaimedTicket>, TicketError>;

    /// Reset an orphaned ticket to open, only if its pid is still `expected_pid`.
    fn reset_orphan(
        &self,
        id: TicketId,
        expected_pid: u32,
        reason: &str,
    ) -> Result<bool, TicketError>;
}

/// Truncate an error message to the failure-history bound.
pub fn truncate_failure_message(message: &str) -> String {
    message.chars().take(MAX_FAILURE_MESSAGE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_builder() {
        let filter = TicketFilter::new()
            .with_status(TicketStatus::Open)
            .with_kind(TicketKind::Defect)
            .with_limit(5)
            .with_offset(10);
        assert_eq!(filter.status, Some(TicketStatus::Open));
        assert_eq!(filter.kind, Some(TicketKind::Defect));
        assert_eq!(filter.limit, 5);
        assert_eq!(filter.offset, 10);
    }

    #[test]
    fn test_error_display() {
        let err = TicketError::AssignedToOther {
            ticket_id: TicketId(7),
            current: "worker-b".to_string(),
        };
        assert_eq!(err.to_string(), "Ticket TKT-0000007 is assigned to worker-b");
        assert!(err.is_conflict());
        assert!(!TicketError::Database("x".into()).is_conflict());
    }

    #[test]
    fn test_truncate_failure_message() {
        let long = "x".repeat(800);
        assert_eq!(truncate_failure_message(&long).chars().count(), 500);
        assert_eq!(truncate_failure_message("short"), "short");
    }
}
