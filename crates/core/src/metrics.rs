//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Claims and orphan recovery
//! - Resource locks and conflict backoff
//! - The worker pool
//! - Event delivery

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Claims
// =============================================================================

/// Claim attempts by result.
pub static CLAIMS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("spawnpool_claims_total", "Total claim attempts"),
        &["result"], // "claimed", "empty"
    )
    .expect("valid metric")
});

/// Tickets returned to the queue after their claimant died.
pub static ORPHANS_RESCUED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "spawnpool_orphans_rescued_total",
        "Tickets reset to open after their worker process disappeared",
    )
    .expect("valid metric")
});

/// Reconciler passes by result.
pub static RECONCILE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("spawnpool_reconcile_runs_total", "Total reconciler passes"),
        &["result"], // "ok", "error"
    )
    .expect("valid metric")
});

// =============================================================================
// Locks
// =============================================================================

/// Lock acquisitions by resource and outcome.
pub static LOCK_ACQUISITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "spawnpool_lock_acquisitions_total",
            "Resource lock acquisition attempts",
        ),
        &["resource", "outcome"], // "acquired", "reclaimed", "busy"
    )
    .expect("valid metric")
});

/// Lock releases by resource and source.
pub static LOCK_RELEASES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("spawnpool_lock_releases_total", "Resource lock releases"),
        &["resource", "source"], // "holder", "reconciler"
    )
    .expect("valid metric")
});

/// Conflict backoff waits by outcome.
pub static CONFLICT_WAITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "spawnpool_conflict_waits_total",
            "Waits on a resource held by another process",
        ),
        &["outcome"], // "retried", "timeout", "cancelled"
    )
    .expect("valid metric")
});

/// Time spent waiting for a conflicting holder.
pub static CONFLICT_WAIT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "spawnpool_conflict_wait_seconds",
            "Duration of conflict backoff waits",
        )
        .buckets(vec![1.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]),
        &["outcome"],
    )
    .expect("valid metric")
});

// =============================================================================
// Worker pool
// =============================================================================

/// Worker spawns by agent profile and result.
pub static WORKER_SPAWNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("spawnpool_worker_spawns_total", "Worker process launches"),
        &["profile", "result"], // "spawned", "failed"
    )
    .expect("valid metric")
});

/// Workers currently tracked by the scaler.
pub static WORKERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("spawnpool_workers_active", "Live worker processes").expect("valid metric")
});

/// Workers leaving the pool by reason.
pub static WORKERS_TERMINATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "spawnpool_workers_terminated_total",
            "Worker processes removed from the pool",
        ),
        &["reason"], // "exited", "killed"
    )
    .expect("valid metric")
});

// =============================================================================
// Events
// =============================================================================

/// Events handed to the notifier by event type and delivery mode.
pub static EVENTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("spawnpool_events_published_total", "Published ticket events"),
        &["event", "mode"], // mode: "broker", "polling"
    )
    .expect("valid metric")
});

/// All core metrics, for registration by the binary.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Claims
        Box::new(CLAIMS_TOTAL.clone()),
        Box::new(ORPHANS_RESCUED.clone()),
        Box::new(RECONCILE_RUNS.clone()),
        // Locks
        Box::new(LOCK_ACQUISITIONS.clone()),
        Box::new(LOCK_RELEASES.clone()),
        Box::new(CONFLICT_WAITS.clone()),
        Box::new(CONFLICT_WAIT_DURATION.clone()),
        // Worker pool
        Box::new(WORKER_SPAWNS.clone()),
        Box::new(WORKERS_ACTIVE.clone()),
        Box::new(WORKERS_TERMINATED.clone()),
        // Events
        Box::new(EVENTS_PUBLISHED.clone()),
    ]
}
