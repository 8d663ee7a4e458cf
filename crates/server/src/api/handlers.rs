use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use spawnpool_core::{
    reconciler::ReconcilerStatus, scaler::ScalerStatus, NotifierMode, SanitizedConfig,
};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Background loop and event layer status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub notifier: NotifierMode,
    pub reconciler: Option<ReconcilerStatus>,
    pub scaler: Option<ScalerStatus>,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let reconciler = match state.reconciler() {
        Some(reconciler) => Some(reconciler.status().await),
        None => None,
    };
    let scaler = match state.scaler() {
        Some(scaler) => Some(scaler.status().await),
        None => None,
    };

    Json(StatusResponse {
        notifier: state.notifier_mode(),
        reconciler,
        scaler,
    })
}

/// Prometheus text exposition.
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
