//! Ticket store and claim protocol.
//!
//! Tickets are claimed atomically by workers, returned to the queue on
//! failure and reset by the orphan reconciler when their claimant dies.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteTicketStore;
pub use store::{
    truncate_failure_message, CreateTicketRequest, TicketError, TicketFilter, TicketOrder,
    TicketStore, MAX_FAILURE_MESSAGE_CHARS,
};
pub use types::{
    ClaimedTicket, ParseTicketIdError, Priority, Ticket, TicketId, TicketKind, TicketStatus,
    TICKET_ID_PREFIX,
};
