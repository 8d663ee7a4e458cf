//! Orphan reconciler implementation.
//!
//! A worker that dies mid-ticket never releases its claim. The reconciler
//! finds claims whose process no longer exists and returns them to the
//! queue, and frees lock slots held by dead processes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::config::ReconcilerConfig;
use super::liveness::ProcessLiveness;
use super::types::{ReconcileError, ReconcileReport, ReconcilerStatus};
use crate::lock::LockStore;
use crate::metrics::{LOCK_RELEASES, ORPHANS_RESCUED, RECONCILE_RUNS};
use crate::notify::{Notifier, TicketEvent};
use crate::ticket::TicketStore;

/// Resets tickets and lock slots whose owning process has died.
pub struct OrphanReconciler {
    config: ReconcilerConfig,
    ticket_store: Arc<dyn TicketStore>,
    lock_store: Option<Arc<dyn LockStore>>,
    liveness: Arc<dyn ProcessLiveness>,
    notifier: Option<Arc<dyn Notifier>>,

    // Runtime state
    running: Arc<AtomicBool>,
    total_rescued: Arc<AtomicU64>,
    last_run: Arc<RwLock<Option<ReconcileReport>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl OrphanReconciler {
    pub fn new(
        config: ReconcilerConfig,
        ticket_store: Arc<dyn TicketStore>,
        liveness: Arc<dyn ProcessLiveness>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            ticket_store,
            lock_store: None,
            liveness,
            notifier: None,
            running: Arc::new(AtomicBool::new(false)),
            total_rescued: Arc::new(AtomicU64::new(0)),
            last_run: Arc::new(RwLock::new(None)),
            shutdown_tx,
        }
    }

    /// Also sweep lock slots held by dead processes.
    pub fn with_lock_store(mut self, lock_store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(lock_store);
        self
    }

    /// Publish an event for every reset.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run one reconcile pass now.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let result = Self::reconcile_pass(
            &self.ticket_store,
            self.lock_store.as_ref(),
            &self.liveness,
            self.notifier.as_ref(),
        )
        .await;
        self.record(&result).await;
        result
    }

    /// Start the background loop. The first pass runs before returning.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Reconciler already running");
            return;
        }

        info!(
            "Starting orphan reconciler (interval {}ms)",
            self.config.interval_ms
        );

        if let Err(e) = self.reconcile().await {
            warn!("Startup reconcile error: {}", e);
        }

        self.spawn_reconcile_loop();
    }

    /// Stop the background loop.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Reconciler not running");
            return;
        }

        info!("Stopping orphan reconciler");
        let _ = self.shutdown_tx.send(());
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Orphan reconciler stopped");
    }

    pub async fn status(&self) -> ReconcilerStatus {
        ReconcilerStatus {
            running: self.running.load(Ordering::Relaxed),
            interval_ms: self.config.interval_ms,
            total_rescued: self.total_rescued.load(Ordering::Relaxed),
            last_run: self.last_run.read().await.clone(),
        }
    }

    async fn record(&self, result: &Result<ReconcileReport, ReconcileError>) {
        Self::record_into(&self.total_rescued, &self.last_run, result).await;
    }

    async fn record_into(
        total_rescued: &AtomicU64,
        last_run: &RwLock<Option<ReconcileReport>>,
        result: &Result<ReconcileReport, ReconcileError>,
    ) {
        match result {
            Ok(report) => {
                RECONCILE_RUNS.with_label_values(&["ok"]).inc();
                total_rescued.fetch_add(report.tickets_rescued.len() as u64, Ordering::Relaxed);
                *last_run.write().await = Some(report.clone());
            }
            Err(_) => RECONCILE_RUNS.with_label_values(&["error"]).inc(),
        }
    }

    fn spawn_reconcile_loop(&self) {
        let running = Arc::clone(&self.running);
        let ticket_store = Arc::clone(&self.ticket_store);
        let lock_store = self.lock_store.clone();
        let liveness = Arc::clone(&self.liveness);
        let notifier = self.notifier.clone();
        let total_rescued = Arc::clone(&self.total_rescued);
        let last_run = Arc::clone(&self.last_run);
        let interval = Duration::from_millis(self.config.interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Reconcile loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reconcile loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let result = Self::reconcile_pass(
                            &ticket_store,
                            lock_store.as_ref(),
                            &liveness,
                            notifier.as_ref(),
                        ).await;
                        if let Err(e) = &result {
                            warn!("Reconcile error: {}", e);
                        }
                        Self::record_into(&total_rescued, &last_run, &result).await;
                    }
                }
            }
            info!("Reconcile loop stopped");
        });
    }

    async fn reconcile_pass(
        ticket_store: &Arc<dyn TicketStore>,
        lock_store: Option<&Arc<dyn LockStore>>,
        liveness: &Arc<dyn ProcessLiveness>,
        notifier: Option<&Arc<dyn Notifier>>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let claimed = ticket_store.list_claimed()?;
        let mut tickets_rescued = Vec::new();

        for claim in &claimed {
            if liveness.is_alive(claim.worker_pid) {
                continue;
            }

            let reason = format!("worker process {} no longer exists", claim.worker_pid);
            match ticket_store.reset_orphan(claim.id, claim.worker_pid, &reason) {
                Ok(true) => {
                    info!(
                        "Reset orphaned ticket {} (worker {} pid {})",
                        claim.id,
                        claim.assigned_to.as_deref().unwrap_or("-"),
                        claim.worker_pid
                    );
                    ORPHANS_RESCUED.inc();
                    tickets_rescued.push(claim.id);
                }
                Ok(false) => {
                    debug!("Ticket {} changed hands before reset, skipping", claim.id);
                }
                Err(e) => warn!("Failed to reset orphaned ticket {}: {}", claim.id, e),
            }
        }

        if let Some(notifier) = notifier {
            for id in &tickets_rescued {
                match ticket_store.get(*id) {
                    Ok(Some(ticket)) => notifier.publish(TicketEvent::status_changed(&ticket)).await,
                    Ok(None) => {}
                    Err(e) => warn!("Failed to load rescued ticket {}: {}", id, e),
                }
            }
        }

        let mut locks_released = Vec::new();
        if let Some(lock_store) = lock_store {
            for slot in lock_store.list()? {
                let (Some(holder), Some(pid)) = (slot.holder_task_id.as_deref(), slot.holder_pid)
                else {
                    continue;
                };
                if liveness.is_alive(pid) {
                    continue;
                }

                match lock_store.clear_if_held_by(&slot.resource, holder) {
                    Ok(true) => {
                        info!(
                            "Released lock {} held by dead task {} (pid {})",
                            slot.resource, holder, pid
                        );
                        LOCK_RELEASES
                            .with_label_values(&[slot.resource.as_str(), "reconciler"])
                            .inc();
                        if let Some(notifier) = notifier {
                            notifier
                                .publish(TicketEvent::LockReleased {
                                    resource: slot.resource.clone(),
                                    holder_task_id: holder.to_string(),
                                })
                                .await;
                        }
                        locks_released.push(slot.resource.clone());
                    }
                    Ok(false) => debug!("Lock {} changed hands before release", slot.resource),
                    Err(e) => warn!("Failed to release lock {}: {}", slot.resource, e),
                }
            }
        }

        Ok(ReconcileReport {
            checked: claimed.len(),
            tickets_rescued,
            locks_released,
            finished_at: Utc::now(),
        })
    }
}
