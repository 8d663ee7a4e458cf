//! Ticket API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use spawnpool_core::{
    CreateTicketRequest, Priority, Ticket, TicketError, TicketEvent, TicketFilter, TicketId,
    TicketKind, TicketStatus,
};

use super::{api_error, ApiError, ErrorResponse};
use crate::metrics::TICKETS_CREATED_TOTAL;
use crate::state::AppState;

/// Maximum allowed limit for ticket queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for ticket queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a ticket
#[derive(Debug, Deserialize)]
pub struct CreateTicketBody {
    /// Explicit id; repeated submissions return the existing ticket.
    pub id: Option<TicketId>,
    pub kind: TicketKind,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub priority: Priority,
    pub metadata: Option<serde_json::Value>,
    pub created_by: Option<String>,
}

/// Query parameters for listing tickets
#[derive(Debug, Deserialize)]
pub struct ListTicketsParams {
    /// Status filter; `all` for every status. Defaults to `open`.
    pub status: Option<String>,
    pub kind: Option<TicketKind>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Request body for claiming the next ticket
#[derive(Debug, Deserialize)]
pub struct ClaimBody {
    pub worker_id: String,
    pub worker_pid: u32,
    pub kind: Option<TicketKind>,
}

/// Request body for a status update
#[derive(Debug, Deserialize)]
pub struct SetStatusBody {
    pub worker_id: String,
    pub status: TicketStatus,
    pub note: Option<String>,
}

/// Request body for returning a ticket to the queue
#[derive(Debug, Deserialize)]
pub struct ReleaseBody {
    pub worker_id: String,
    pub error: Option<String>,
}

/// Request body for cancelling a ticket
#[derive(Debug, Default, Deserialize)]
pub struct CancelTicketBody {
    /// Optional reason for cancellation
    pub reason: Option<String>,
}

/// Response for ticket operations
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub display_id: String,
    #[serde(flatten)]
    pub ticket: Ticket,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            display_id: ticket.display_id(),
            ticket,
        }
    }
}

/// Response for listing tickets
#[derive(Debug, Serialize)]
pub struct ListTicketsResponse {
    pub tickets: Vec<TicketResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub released: bool,
}

// ============================================================================
// Error mapping
// ============================================================================

fn ticket_error(e: TicketError) -> ApiError {
    let status = match &e {
        TicketError::NotFound(_) => StatusCode::NOT_FOUND,
        TicketError::AlreadyTerminal { .. }
        | TicketError::AssignedToOther { .. }
        | TicketError::DuplicateTicket { .. } => StatusCode::CONFLICT,
        TicketError::InvalidStatus { .. } => StatusCode::BAD_REQUEST,
        TicketError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let existing_id = match &e {
        TicketError::DuplicateTicket { existing_id } => Some(*existing_id),
        _ => None,
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            existing_id,
        }),
    )
}

fn parse_id(raw: &str) -> Result<TicketId, ApiError> {
    raw.parse::<TicketId>()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new ticket
pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTicketBody>,
) -> Result<(StatusCode, Json<TicketResponse>), ApiError> {
    if body.title.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "title cannot be empty"));
    }

    let mut request = CreateTicketRequest::new(body.kind, body.title, body.summary)
        .with_priority(body.priority);
    if let Some(id) = body.id {
        request = request.with_id(id);
    }
    if let Some(metadata) = body.metadata {
        request = request.with_metadata(metadata);
    }
    if let Some(created_by) = body.created_by {
        request = request.with_created_by(created_by);
    }

    let ticket = state.ticket_store().create(request).map_err(ticket_error)?;
    info!("Ticket {} created: {}", ticket.id, ticket.title);
    TICKETS_CREATED_TOTAL.inc();
    state.publish(TicketEvent::created(&ticket)).await;

    Ok((StatusCode::CREATED, Json(TicketResponse::from(ticket))))
}

/// Get a ticket by ID
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = parse_id(&id)?;
    match state.ticket_store().get(id).map_err(ticket_error)? {
        Some(ticket) => Ok(Json(TicketResponse::from(ticket))),
        None => Err(ticket_error(TicketError::NotFound(id))),
    }
}

/// List tickets with optional filters
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTicketsParams>,
) -> Result<Json<ListTicketsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = TicketFilter::new().with_limit(limit).with_offset(offset);

    match params.status.as_deref().unwrap_or("open") {
        "all" => {}
        raw => {
            let status = raw
                .parse::<TicketStatus>()
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
            filter = filter.with_status(status);
        }
    }

    if let Some(kind) = params.kind {
        filter = filter.with_kind(kind);
    }

    let tickets = state.ticket_store().list(&filter).map_err(ticket_error)?;
    let total = state.ticket_store().count(&filter).map_err(ticket_error)?;

    Ok(Json(ListTicketsResponse {
        tickets: tickets.into_iter().map(TicketResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Claim the next open ticket. 204 when the queue is empty.
pub async fn claim_ticket(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClaimBody>,
) -> Result<Response, ApiError> {
    if body.worker_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "worker_id cannot be empty"));
    }

    let claimed = state
        .ticket_store()
        .claim(&body.worker_id, body.worker_pid, body.kind)
        .map_err(ticket_error)?;

    match claimed {
        Some(ticket) => {
            state.publish(TicketEvent::status_changed(&ticket)).await;
            Ok(Json(TicketResponse::from(ticket)).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Update a ticket's status on behalf of its worker
pub async fn set_ticket_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SetStatusBody>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = parse_id(&id)?;
    let ticket = state
        .ticket_store()
        .set_status(id, &body.worker_id, body.status, body.note.as_deref())
        .map_err(ticket_error)?;

    state.publish(TicketEvent::status_changed(&ticket)).await;
    Ok(Json(TicketResponse::from(ticket)))
}

/// Return a claimed ticket to the queue
pub async fn release_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ReleaseBody>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let id = parse_id(&id)?;
    let released = state
        .ticket_store()
        .release(id, &body.worker_id, body.error.as_deref())
        .map_err(ticket_error)?;

    if released {
        if let Ok(Some(ticket)) = state.ticket_store().get(id) {
            state.publish(TicketEvent::status_changed(&ticket)).await;
        }
    }
    Ok(Json(ReleaseResponse { released }))
}

/// Cancel a ticket
pub async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelTicketBody>>,
) -> Result<Json<TicketResponse>, ApiError> {
    let id = parse_id(&id)?;
    let body = body.map(|Json(body)| body).unwrap_or_default();

    let ticket = state
        .ticket_store()
        .cancel(id, body.reason.as_deref())
        .map_err(ticket_error)?;

    info!("Ticket {} cancelled", ticket.id);
    state.publish(TicketEvent::status_changed(&ticket)).await;
    Ok(Json(TicketResponse::from(ticket)))
}
