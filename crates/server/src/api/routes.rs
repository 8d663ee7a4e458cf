use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, holders, locks, middleware::metrics_middleware, tickets, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and observability
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        .route("/metrics", get(handlers::get_metrics))
        // Tickets
        .route("/tickets", post(tickets::create_ticket))
        .route("/tickets", get(tickets::list_tickets))
        .route("/tickets/claim", post(tickets::claim_ticket))
        .route("/tickets/{id}", get(tickets::get_ticket))
        .route("/tickets/{id}/status", post(tickets::set_ticket_status))
        .route("/tickets/{id}/release", post(tickets::release_ticket))
        .route("/tickets/{id}/cancel", post(tickets::cancel_ticket))
        // Resource locks
        .route("/locks", get(locks::list_locks))
        .route("/locks/{resource}/acquire", post(locks::acquire_lock))
        .route("/locks/{resource}/release", post(locks::release_lock))
        .route("/holders/{task_id}", get(holders::get_holder_status))
        // Events
        .route("/events", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
