//! Event types and the notifier trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ticket::{Priority, TicketError, TicketId, TicketKind, TicketStatus};

/// Event channel names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "ticket.created")]
    TicketCreated,
    /// Status change, claim, release or orphan reset.
    #[serde(rename = "ticket.updated")]
    TicketUpdated,
    #[serde(rename = "lock.released")]
    LockReleased,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TicketCreated => "ticket.created",
            EventKind::TicketUpdated => "ticket.updated",
            EventKind::LockReleased => "lock.released",
        }
    }

    pub fn all() -> [EventKind; 3] {
        [
            EventKind::TicketCreated,
            EventKind::TicketUpdated,
            EventKind::LockReleased,
        ]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change other components may react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketEvent {
    Created {
        ticket_id: TicketId,
        kind: TicketKind,
        priority: Priority,
        title: String,
    },
    StatusChanged {
        ticket_id: TicketId,
        status: TicketStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assigned_to: Option<String>,
    },
    LockReleased {
        resource: String,
        holder_task_id: String,
    },
}

impl TicketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TicketEvent::Created { .. } => EventKind::TicketCreated,
            TicketEvent::StatusChanged { .. } => EventKind::TicketUpdated,
            TicketEvent::LockReleased { .. } => EventKind::LockReleased,
        }
    }

    pub fn created(ticket: &crate::ticket::Ticket) -> Self {
        TicketEvent::Created {
            ticket_id: ticket.id,
            kind: ticket.kind,
            priority: ticket.priority,
            title: ticket.title.clone(),
        }
    }

    pub fn status_changed(ticket: &crate::ticket::Ticket) -> Self {
        TicketEvent::StatusChanged {
            ticket_id: ticket.id,
            status: ticket.status,
            assigned_to: ticket.assigned_to.clone(),
        }
    }
}

/// Which delivery mechanism is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierMode {
    Broker,
    Polling,
}

/// Errors from the event layer.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("event broker error: {0}")]
    Broker(String),

    #[error("event broker unreachable: {0}")]
    Unreachable(String),

    #[error("ticket store error: {0}")]
    Store(#[from] TicketError),
}

impl From<redis::RedisError> for NotifyError {
    fn from(e: redis::RedisError) -> Self {
        NotifyError::Broker(e.to_string())
    }
}

/// Stream of events of one kind. Dropping it stops delivery.
pub struct EventSubscription {
    rx: mpsc::Receiver<TicketEvent>,
    task: Option<JoinHandle<()>>,
}

impl EventSubscription {
    pub fn new(rx: mpsc::Receiver<TicketEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Wait for the next event. None once the source has stopped.
    pub async fn recv(&mut self) -> Option<TicketEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TicketEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Publish/subscribe over ticket events.
///
/// Delivery is best effort. Every consumer must stay correct when no event
/// ever arrives.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish an event. Never fails the caller.
    async fn publish(&self, event: TicketEvent);

    /// Subscribe to one event kind.
    async fn subscribe(&self, kind: EventKind) -> Result<EventSubscription, NotifyError>;

    fn mode(&self) -> NotifierMode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::TicketCreated.as_str(), "ticket.created");
        assert_eq!(
            serde_json::to_string(&EventKind::TicketUpdated).unwrap(),
            "\"ticket.updated\""
        );
    }

    #[test]
    fn test_event_wire_format() {
        let event = TicketEvent::StatusChanged {
            ticket_id: TicketId(3),
            status: TicketStatus::Open,
            assigned_to: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "status_changed", "ticket_id": 3, "status": "open" })
        );
        assert_eq!(event.kind(), EventKind::TicketUpdated);

        let parsed: TicketEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
