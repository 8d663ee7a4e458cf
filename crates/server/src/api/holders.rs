//! Holder status lookups for the conflict backoff protocol.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use spawnpool_core::backoff::HolderStatusResponse;

use super::{api_error, ApiError};
use crate::state::AppState;

/// Status of the task holding (or last holding) a resource
pub async fn get_holder_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<HolderStatusResponse>, ApiError> {
    let status = state
        .holder_status()
        .lookup(&task_id)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(HolderStatusResponse { task_id, status }))
}
