//! Prometheus metrics for the HTTP server.
//!
//! The server registry holds:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Ticket counts by status (collected on scrape)
//! - Every core metric (claims, locks, backoff, workers, events)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

use spawnpool_core::{TicketFilter, TicketStatus};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "spawnpool_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .expect("valid metric")
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("spawnpool_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("valid metric")
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "spawnpool_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .expect("valid metric")
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "spawnpool_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .expect("valid metric")
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "spawnpool_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .expect("valid metric")
});

/// WebSocket messages sent by event kind.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("spawnpool_ws_messages_sent_total", "WebSocket messages sent"),
        &["kind"],
    )
    .expect("valid metric")
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "spawnpool_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .expect("valid metric")
});

// =============================================================================
// Ticket Metrics
// =============================================================================

/// Tickets by current status (collected dynamically).
pub static TICKETS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("spawnpool_tickets_by_status", "Current ticket count by status"),
        &["status"],
    )
    .expect("valid metric")
});

/// Tickets created through the API.
pub static TICKETS_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "spawnpool_tickets_created_total",
        "Total tickets created through the API since startup",
    )
    .expect("valid metric")
});

/// Reconciler and scaler loop state (1 = running).
pub static LOOP_RUNNING: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "spawnpool_loop_running",
            "Whether a background loop is running (1) or stopped (0)",
        ),
        &["loop"], // "reconciler", "scaler"
    )
    .expect("valid metric")
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    let server_metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // HTTP
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        // WebSocket
        Box::new(WS_CONNECTIONS_ACTIVE.clone()),
        Box::new(WS_CONNECTIONS_TOTAL.clone()),
        Box::new(WS_MESSAGES_SENT.clone()),
        Box::new(WS_LAG_EVENTS.clone()),
        // Tickets and loops
        Box::new(TICKETS_BY_STATUS.clone()),
        Box::new(TICKETS_CREATED_TOTAL.clone()),
        Box::new(LOOP_RUNNING.clone()),
    ];

    // Core metrics (claims, locks, backoff, workers, events)
    let core_metrics = spawnpool_core::metrics::all_metrics();

    for metric in server_metrics.into_iter().chain(core_metrics) {
        if let Err(e) = registry.register(metric) {
            warn!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the store and loops at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    if let Some(reconciler) = state.reconciler() {
        let running = reconciler.status().await.running;
        LOOP_RUNNING
            .with_label_values(&["reconciler"])
            .set(i64::from(running));
    }

    if let Some(scaler) = state.scaler() {
        let running = scaler.status().await.running;
        LOOP_RUNNING
            .with_label_values(&["scaler"])
            .set(i64::from(running));
    }

    let ticket_store = state.ticket_store();
    for status in TicketStatus::all() {
        let filter = TicketFilter::new().with_status(status);
        if let Ok(count) = ticket_store.count(&filter) {
            TICKETS_BY_STATUS
                .with_label_values(&[status.as_str()])
                .set(count);
        }
    }
}

static TICKET_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"TKT-\d+").expect("valid regex"));
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").expect("valid regex"));

/// Normalize a path for metric labels (replace IDs with placeholders).
///
/// Lock resources and holder task ids are free-form, so the segment after
/// `/locks/` and `/holders/` is always replaced.
pub fn normalize_path(path: &str) -> String {
    let result = TICKET_ID_RE.replace_all(path, "{id}");
    let result = NUMERIC_RE.replace_all(&result, "/{id}$1");

    let mut segments: Vec<&str> = result.split('/').collect();
    for i in 1..segments.len() {
        match segments[i - 1] {
            "locks" => segments[i] = "{resource}",
            "holders" => segments[i] = "{task_id}",
            _ => {}
        }
    }
    segments.join("/")
}
