//! Worker pool scaler implementation.
//!
//! Each tick compares the claimable backlog with the live pool:
//! - grows by at most one worker per tick, up to `max_workers`
//! - shrinks only when the backlog is empty, and only idle workers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::command::AgentCommand;
use super::config::{AgentProfile, ScalerConfig};
use super::launcher::WorkerLauncher;
use super::pool::{WorkerPoolState, WorkerSlot};
use super::types::{ScalerError, ScalerStatus, SlotState, SpawnedWorker, TickReport};
use crate::metrics::{WORKERS_ACTIVE, WORKERS_TERMINATED, WORKER_SPAWNS};
use crate::notify::{EventKind, EventSubscription, Notifier, TicketEvent};
use crate::ticket::{Ticket, TicketFilter, TicketStatus, TicketStore};

/// State shared between the scaler handle and its background loop.
struct ScalerCore {
    config: ScalerConfig,
    ticket_store: Arc<dyn TicketStore>,
    launcher: Arc<dyn WorkerLauncher>,
    notifier: Option<Arc<dyn Notifier>>,
    pid: u32,
    pool: Mutex<WorkerPoolState>,
}

/// Keeps the number of worker processes in line with the backlog.
pub struct WorkerPoolScaler {
    core: Arc<ScalerCore>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPoolScaler {
    pub fn new(
        config: ScalerConfig,
        ticket_store: Arc<dyn TicketStore>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self::build(config, ticket_store, launcher, None)
    }

    /// Wake early on new tickets and publish reservation changes.
    pub fn with_notifier(
        config: ScalerConfig,
        ticket_store: Arc<dyn TicketStore>,
        launcher: Arc<dyn WorkerLauncher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::build(config, ticket_store, launcher, Some(notifier))
    }

    fn build(
        config: ScalerConfig,
        ticket_store: Arc<dyn TicketStore>,
        launcher: Arc<dyn WorkerLauncher>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            core: Arc::new(ScalerCore {
                config,
                ticket_store,
                launcher,
                notifier,
                pid: std::process::id(),
                pool: Mutex::new(WorkerPoolState::new()),
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Run one scaling step now.
    pub async fn tick(&self) -> Result<TickReport, ScalerError> {
        self.core.tick().await
    }

    /// Start the background loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scaler already running");
            return;
        }

        info!(
            "Starting worker pool scaler (max {} workers, {} profiles)",
            self.core.config.max_workers,
            self.core.config.agents.len()
        );

        let subscription = match &self.core.notifier {
            Some(notifier) => match notifier.subscribe(EventKind::TicketCreated).await {
                Ok(sub) => Some(sub),
                Err(e) => {
                    warn!("Scaler not subscribed to new tickets: {}", e);
                    None
                }
            },
            None => None,
        };

        self.spawn_tick_loop(subscription);
    }

    /// Stop the background loop. Running workers are left alone.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scaler not running");
            return;
        }

        info!("Stopping worker pool scaler");
        let _ = self.shutdown_tx.send(());
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Worker pool scaler stopped");
    }

    pub async fn status(&self) -> ScalerStatus {
        let pending = self
            .core
            .ticket_store
            .count_claimable(None)
            .unwrap_or(0)
            .max(0) as usize;
        let pool = self.core.pool.lock().await;

        ScalerStatus {
            running: self.running.load(Ordering::Relaxed),
            max_workers: self.core.config.max_workers,
            pending,
            workers: pool.workers(),
            disabled_profiles: pool.disabled_profiles(),
        }
    }

    /// Re-enable a profile disabled after repeated spawn failures.
    pub async fn enable_profile(&self, profile: &str) -> bool {
        let enabled = self.core.pool.lock().await.enable(profile);
        if enabled {
            info!("Re-enabled agent profile {}", profile);
        }
        enabled
    }

    fn spawn_tick_loop(&self, mut subscription: Option<EventSubscription>) {
        let running = Arc::clone(&self.running);
        let core = Arc::clone(&self.core);
        let interval = Duration::from_millis(core.config.tick_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Scaler loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Scaler loop received shutdown signal");
                        break;
                    }
                    event = next_event(&mut subscription) => {
                        if event.is_none() {
                            debug!("Ticket event subscription closed");
                            subscription = None;
                            continue;
                        }
                        debug!("New ticket, ticking early");
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                if !running.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = core.tick().await {
                    warn!("Scaler tick error: {}", e);
                }
            }
            info!("Scaler loop stopped");
        });
    }
}

async fn next_event(subscription: &mut Option<EventSubscription>) -> Option<TicketEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

impl ScalerCore {
    async fn tick(&self) -> Result<TickReport, ScalerError> {
        let mut pool = self.pool.lock().await;
        let mut report = TickReport::default();

        for (slot, exit) in pool.reap() {
            info!(
                "Worker {} (pid {}) exited with {:?}",
                slot.worker_id,
                slot.pid(),
                exit.code
            );
            WORKERS_TERMINATED.with_label_values(&["exited"]).inc();
            report.reaped.push(slot.worker_id);
        }

        report.pending = self.ticket_store.count_claimable(None)?.max(0) as usize;
        report.current = pool.live_count();
        report.desired = report.pending.min(self.config.max_workers);

        if report.desired > report.current {
            self.spawn_one(&mut pool, &mut report).await?;
        } else if report.desired < report.current && report.pending == 0 {
            let excess = report.current - report.desired;
            report.killed = self.kill_idle(&mut pool, excess)?;
        }

        WORKERS_ACTIVE.set(pool.live_count() as i64);
        debug!(
            "Scaler tick: pending={} desired={} current={} live={}",
            report.pending,
            report.desired,
            report.current,
            pool.live_count()
        );
        Ok(report)
    }

    fn eligible_profiles<'a>(&'a self, pool: &'a WorkerPoolState) -> impl Iterator<Item = &'a AgentProfile> {
        self.config.agents.iter().filter(move |p| {
            p.enabled
                && !pool.is_disabled(&p.name)
                && p
                    .max_instances
                    .map_or(true, |max| pool.live_count_for(&p.name) < max)
        })
    }

    /// Reserve a ticket for the first eligible profile and launch it.
    async fn spawn_one(
        &self,
        pool: &mut WorkerPoolState,
        report: &mut TickReport,
    ) -> Result<(), ScalerError> {
        let identity = self.config.identity.as_str();

        let mut reservation = None;
        for profile in self.eligible_profiles(pool) {
            if let Some(ticket) = self.ticket_store.claim(identity, self.pid, profile.kind)? {
                reservation = Some((profile.clone(), ticket));
                break;
            }
        }
        let Some((profile, ticket)) = reservation else {
            debug!("No eligible profile has claimable work");
            return Ok(());
        };

        let worker_id = format!(
            "pool-{}-{}",
            profile.name,
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let launched = AgentCommand::for_ticket(
            &profile,
            &worker_id,
            &ticket,
            self.config.server_url.as_deref(),
            self.config.summary_max_chars,
        )
        .and_then(|command| self.launcher.launch(&command));

        let process = match launched {
            Ok(process) => process,
            Err(e) => {
                self.handle_spawn_failure(pool, &profile, &ticket, &e).await?;
                report.spawn_failed = Some(profile.name.clone());
                return Ok(());
            }
        };

        let pid = process.pid();
        pool.insert(WorkerSlot::new(
            worker_id.clone(),
            profile.name.clone(),
            Some(ticket.id),
            process,
        ));

        let handed_over = match self.ticket_store.hand_over(ticket.id, identity, &worker_id, pid) {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    "Ticket {} changed before hand-over to {}; worker will claim its own",
                    ticket.id, worker_id
                );
                false
            }
            Err(e) => {
                // The reservation carries our own pid, so the reconciler would
                // never free it. Give it back; the worker claims its own.
                warn!(
                    "Failed to hand ticket {} to {}: {}; returning it to the queue",
                    ticket.id, worker_id, e
                );
                let message = format!("hand-over to {} failed: {}", worker_id, e);
                match self.ticket_store.release(ticket.id, identity, Some(&message)) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("Reserved ticket {} was no longer ours to release", ticket.id)
                    }
                    Err(e) => warn!("Failed to release reserved ticket {}: {}", ticket.id, e),
                }
                false
            }
        };

        if let Some(slot) = pool.get_mut(&worker_id) {
            slot.state = SlotState::Running;
            if !handed_over {
                slot.ticket_id = None;
            }
        }
        pool.record_success(&profile.name);
        WORKER_SPAWNS
            .with_label_values(&[profile.name.as_str(), "spawned"])
            .inc();
        info!(
            "Spawned worker {} (pid {}) for ticket {}",
            worker_id, pid, ticket.id
        );

        if let Some(notifier) = &self.notifier {
            if let Ok(Some(current)) = self.ticket_store.get(ticket.id) {
                notifier.publish(TicketEvent::status_changed(&current)).await;
            }
        }

        report.spawned = Some(SpawnedWorker {
            worker_id,
            profile: profile.name,
            pid,
            ticket_id: ticket.id,
        });
        Ok(())
    }

    /// Return the reserved ticket and count the failure against the profile.
    async fn handle_spawn_failure(
        &self,
        pool: &mut WorkerPoolState,
        profile: &AgentProfile,
        ticket: &Ticket,
        error: &ScalerError,
    ) -> Result<(), ScalerError> {
        warn!(
            "Failed to spawn {} for ticket {}: {}",
            profile.name, ticket.id, error
        );
        WORKER_SPAWNS
            .with_label_values(&[profile.name.as_str(), "failed"])
            .inc();

        let message = format!("spawn failed ({}): {}", profile.name, error);
        if !self
            .ticket_store
            .release(ticket.id, &self.config.identity, Some(&message))?
        {
            warn!("Reserved ticket {} was no longer ours to release", ticket.id);
        }

        let failures = pool.record_failure(&profile.name);
        if failures >= self.config.max_consecutive_failures {
            pool.disable(&profile.name);
            warn!(
                "Disabled agent profile {} after {} consecutive spawn failures",
                profile.name, failures
            );
        }
        Ok(())
    }

    /// Kill up to `excess` workers that hold no in-progress ticket.
    fn kill_idle(
        &self,
        pool: &mut WorkerPoolState,
        excess: usize,
    ) -> Result<Vec<String>, ScalerError> {
        let mut killed = Vec::new();

        for worker_id in pool.worker_ids() {
            if killed.len() >= excess {
                break;
            }

            let busy = self.ticket_store.count(
                &TicketFilter::new()
                    .with_status(TicketStatus::InProgress)
                    .with_assigned_to(worker_id.clone()),
            )? > 0;
            if busy {
                continue;
            }

            if let Some(slot) = pool.kill(&worker_id) {
                info!("Terminated idle worker {} (pid {})", worker_id, slot.pid());
                WORKERS_TERMINATED.with_label_values(&["killed"]).inc();
                killed.push(worker_id);
            }
        }

        Ok(killed)
    }
}
