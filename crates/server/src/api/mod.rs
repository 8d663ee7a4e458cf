pub mod handlers;
pub mod holders;
pub mod locks;
pub mod middleware;
pub mod routes;
pub mod tickets;
pub mod ws;

pub use routes::create_router;
pub use ws::{forward_events, WsBroadcaster};

use axum::{http::StatusCode, Json};
use serde::Serialize;

use spawnpool_core::TicketId;

/// Error body shared by every handler.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Set on duplicate ticket conflicts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<TicketId>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            existing_id: None,
        }),
    )
}
