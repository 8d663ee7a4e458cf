//! Core ticket data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix used when rendering ticket ids for humans.
pub const TICKET_ID_PREFIX: &str = "TKT-";

/// Integer ticket identity.
///
/// Displayed as `TKT-0000042`; the integer is the only lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketId(pub i64);

impl TicketId {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:07}", TICKET_ID_PREFIX, self.0)
    }
}

/// Error returned when a ticket id cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTicketIdError(pub String);

impl fmt::Display for ParseTicketIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid ticket id: {}", self.0)
    }
}

impl std::error::Error for ParseTicketIdError {}

impl FromStr for TicketId {
    type Err = ParseTicketIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = match trimmed.get(..TICKET_ID_PREFIX.len()) {
            Some(head) if head.eq_ignore_ascii_case(TICKET_ID_PREFIX) => {
                &trimmed[TICKET_ID_PREFIX.len()..]
            }
            _ => trimmed,
        };

        match digits.parse::<i64>() {
            Ok(id) if id > 0 => Ok(TicketId(id)),
            _ => Err(ParseTicketIdError(s.to_string())),
        }
    }
}

impl Serialize for TicketId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for TicketId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(TicketId)
    }
}

/// What a ticket asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Defect,
    ChangeRequest,
}

impl TicketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Defect => "defect",
            TicketKind::ChangeRequest => "change_request",
        }
    }
}

impl FromStr for TicketKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "defect" | "bug" => Ok(TicketKind::Defect),
            "change_request" | "change-request" => Ok(TicketKind::ChangeRequest),
            other => Err(format!("unknown ticket kind: {}", other)),
        }
    }
}

/// Ticket priority. `P0` is the most urgent and is claimed first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    /// Storage rank; lower sorts first.
    pub fn rank(&self) -> i64 {
        match self {
            Priority::P0 => 0,
            Priority::P1 => 1,
            Priority::P2 => 2,
            Priority::P3 => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Priority::P0),
            1 => Some(Priority::P1),
            2 => Some(Priority::P2),
            3 => Some(Priority::P3),
            _ => None,
        }
    }
}

/// Ticket lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Claimable.
    Open,
    /// Claimed by a worker.
    InProgress,
    Resolved,
    Closed,
    #[serde(rename = "wontfix")]
    WontFix,
    Invalid,
    /// Stopped by an operator; workers poll for this between stages.
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
            TicketStatus::WontFix => "wontfix",
            TicketStatus::Invalid => "invalid",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses that end the ticket's life.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TicketStatus::Open | TicketStatus::InProgress)
    }

    /// Statuses that reject any further worker update.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TicketStatus::Resolved | TicketStatus::Closed | TicketStatus::Cancelled
        )
    }

    pub fn all() -> [TicketStatus; 7] {
        [
            TicketStatus::Open,
            TicketStatus::InProgress,
            TicketStatus::Resolved,
            TicketStatus::Closed,
            TicketStatus::WontFix,
            TicketStatus::Invalid,
            TicketStatus::Cancelled,
        ]
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketStatus::all()
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown ticket status: {}", s))
    }
}

/// A unit of work tracked in the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub kind: TicketKind,
    pub priority: Priority,
    pub title: String,
    pub summary: String,
    /// Free-form JSON object. Holds claim info, notes and failure history.
    pub metadata: serde_json::Value,
    pub status: TicketStatus,
    pub assigned_to: Option<String>,
    pub worker_pid: Option<u32>,
    pub created_by: String,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Human-facing identifier (`TKT-0000042`).
    pub fn display_id(&self) -> String {
        self.id.to_string()
    }

    pub fn is_claimable(&self) -> bool {
        self.status == TicketStatus::Open && self.assigned_to.is_none()
    }
}

/// Claimed ticket as seen by the orphan reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTicket {
    pub id: TicketId,
    pub assigned_to: Option<String>,
    pub worker_pid: u32,
}
