//! Resource lock API handlers.
//!
//! These let workers that do not open the database themselves take part in
//! the lock protocol.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use spawnpool_core::{backoff::RemoteLockGrant, LockError, LockOutcome, TicketEvent};

use super::{api_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AcquireBody {
    pub task_id: String,
    /// Holder process, checked by the orphan reconciler.
    pub pid: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseLockBody {
    pub task_id: String,
}

/// Body of a 409 from acquire.
#[derive(Debug, Serialize)]
pub struct BusyResponse {
    pub error: String,
    pub resource: String,
    pub holder_task_id: String,
    pub held_for_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct LockSlotResponse {
    pub resource: String,
    pub holder_task_id: Option<String>,
    pub holder_pid: Option<u32>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub held_for_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseLockResponse {
    pub resource: String,
    pub released: bool,
}

fn lock_error(e: LockError) -> ApiError {
    match e {
        LockError::UnknownResource(resource) => api_error(
            StatusCode::NOT_FOUND,
            format!("unknown resource: {}", resource),
        ),
        LockError::Busy(busy) => api_error(
            StatusCode::CONFLICT,
            format!("{} is held by {}", busy.resource, busy.holder_task_id),
        ),
        LockError::Database(msg) => api_error(StatusCode::INTERNAL_SERVER_ERROR, msg),
    }
}

/// List every lock slot
pub async fn list_locks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LockSlotResponse>>, ApiError> {
    let now = Utc::now();
    let slots = state.locks().snapshot().map_err(lock_error)?;

    Ok(Json(
        slots
            .into_iter()
            .map(|slot| LockSlotResponse {
                held_for_secs: slot.held_for(now).map(|d| d.as_secs()),
                resource: slot.resource,
                holder_task_id: slot.holder_task_id,
                holder_pid: slot.holder_pid,
                acquired_at: slot.acquired_at,
            })
            .collect(),
    ))
}

/// Acquire a resource. 409 while a fresh holder owns it.
pub async fn acquire_lock(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Json(body): Json<AcquireBody>,
) -> Result<Response, ApiError> {
    if body.task_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "task_id cannot be empty"));
    }

    let outcome = state
        .locks()
        .acquire_as(&resource, &body.task_id, body.pid)
        .map_err(lock_error)?;

    let grant = match outcome {
        LockOutcome::Acquired => RemoteLockGrant {
            resource,
            outcome: "acquired".to_string(),
            previous_holder: None,
        },
        LockOutcome::Reclaimed {
            previous_holder, ..
        } => RemoteLockGrant {
            resource,
            outcome: "reclaimed".to_string(),
            previous_holder: Some(previous_holder),
        },
        LockOutcome::Busy(busy) => {
            let body = BusyResponse {
                error: format!("{} is held by {}", busy.resource, busy.holder_task_id),
                resource: busy.resource,
                holder_task_id: busy.holder_task_id,
                held_for_secs: busy.held_for.as_secs(),
            };
            return Ok((StatusCode::CONFLICT, Json(body)).into_response());
        }
    };

    Ok(Json(grant).into_response())
}

/// Release a resource. Idempotent.
pub async fn release_lock(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Json(body): Json<ReleaseLockBody>,
) -> Result<Json<ReleaseLockResponse>, ApiError> {
    state
        .locks()
        .release(&resource, &body.task_id)
        .map_err(lock_error)?;

    state
        .publish(TicketEvent::LockReleased {
            resource: resource.clone(),
            holder_task_id: body.task_id,
        })
        .await;

    Ok(Json(ReleaseLockResponse {
        resource,
        released: true,
    }))
}
