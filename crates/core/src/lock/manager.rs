//! Resource lock manager with zombie-lock takeover.
//!
//! Acquisition never waits: it is a conditional update that either takes a
//! free slot, displaces a holder older than the resource's tier timeout, or
//! reports the slot busy. There is no liveness signal for lock holders other
//! than wall-clock age.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{LockBusy, LockConfig, LockError, LockOutcome, LockStore, ResourceLockSlot};
use crate::clock::{Clock, SystemClock};
use crate::metrics::{LOCK_ACQUISITIONS, LOCK_RELEASES};

/// A free slot can be taken by someone else between our failed update and
/// the read of the holder; retry that window a bounded number of times.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Serializes access to named resources through the lock table.
pub struct ResourceLockManager {
    store: Arc<dyn LockStore>,
    config: LockConfig,
    clock: Arc<dyn Clock>,
    pid: u32,
}

impl ResourceLockManager {
    /// Create a manager and pre-create one slot row per configured resource.
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Result<Self, LockError> {
        store.ensure_slots(&config.resource_names())?;
        Ok(Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            pid: std::process::id(),
        })
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record a different holder pid (for managers acting on behalf of
    /// another process, such as the HTTP API).
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    fn timeout(&self, resource: &str) -> Result<Duration, LockError> {
        self.config
            .timeout_for(resource)
            .ok_or_else(|| LockError::UnknownResource(resource.to_string()))
    }

    /// Try to acquire `resource` for `task_id` as this manager's process.
    pub fn acquire(&self, resource: &str, task_id: &str) -> Result<LockOutcome, LockError> {
        self.acquire_as(resource, task_id, self.pid)
    }

    /// Try to acquire `resource` for `task_id`, recording `pid` as holder.
    pub fn acquire_as(
        &self,
        resource: &str,
        task_id: &str,
        pid: u32,
    ) -> Result<LockOutcome, LockError> {
        let timeout = self.timeout(resource)?;
        let outcome = self.try_acquire(resource, task_id, pid, timeout)?;

        LOCK_ACQUISITIONS
            .with_label_values(&[resource, outcome.label()])
            .inc();

        Ok(outcome)
    }

    fn try_acquire(
        &self,
        resource: &str,
        task_id: &str,
        pid: u32,
        timeout: Duration,
    ) -> Result<LockOutcome, LockError> {
        for _ in 0..ACQUIRE_ATTEMPTS {
            let now = self.clock.now();

            if self.store.try_acquire(resource, task_id, pid, now)? {
                debug!("Lock {} acquired by {}", resource, task_id);
                return Ok(LockOutcome::Acquired);
            }

            let slot = self
                .store
                .get(resource)?
                .ok_or_else(|| LockError::UnknownResource(resource.to_string()))?;

            let holder = match slot.holder_task_id.clone() {
                Some(holder) => holder,
                // Released between the update and the read.
                None => continue,
            };

            if holder == task_id {
                debug!("Lock {} already held by {}", resource, task_id);
                return Ok(LockOutcome::Acquired);
            }

            let held_for = slot.held_for(now).unwrap_or(Duration::ZERO);

            if let Some(stale_since) = slot.acquired_at.filter(|_| held_for > timeout) {
                if self
                    .store
                    .take_over(resource, task_id, pid, now, &holder, stale_since)?
                {
                    warn!(
                        "Reclaimed zombie lock {} from {} after {}s (timeout {}s), new holder {}",
                        resource,
                        holder,
                        held_for.as_secs(),
                        timeout.as_secs(),
                        task_id
                    );
                    return Ok(LockOutcome::Reclaimed {
                        previous_holder: holder,
                        held_for,
                    });
                }
                // Someone else released or reclaimed it first.
                continue;
            }

            debug!(
                "Lock {} busy: held by {} for {}s",
                resource,
                holder,
                held_for.as_secs()
            );
            return Ok(LockOutcome::Busy(LockBusy {
                resource: resource.to_string(),
                holder_task_id: holder,
                held_for,
            }));
        }

        // Heavy churn on the slot; report whoever holds it now.
        let slot = self.slot(resource)?;
        Ok(LockOutcome::Busy(LockBusy {
            resource: resource.to_string(),
            holder_task_id: slot.holder_task_id.clone().unwrap_or_default(),
            held_for: slot.held_for(self.clock.now()).unwrap_or(Duration::ZERO),
        }))
    }

    /// Clear the holder of `resource`. Idempotent.
    ///
    /// The clear is unconditional; if the slot had meanwhile been reclaimed by
    /// another task, that task loses it and a warning is logged.
    pub fn release(&self, resource: &str, task_id: &str) -> Result<(), LockError> {
        self.timeout(resource)?;

        match self.store.clear(resource)? {
            Some(previous) if previous != task_id => {
                warn!(
                    "Lock {} released by {} but was held by {}",
                    resource, task_id, previous
                );
            }
            Some(_) => debug!("Lock {} released by {}", resource, task_id),
            None => debug!("Lock {} already free", resource),
        }

        LOCK_RELEASES.with_label_values(&[resource, "holder"]).inc();
        Ok(())
    }

    /// Clear `resource` only if `task_id` still holds it.
    pub fn release_if_held_by(&self, resource: &str, task_id: &str) -> Result<bool, LockError> {
        self.timeout(resource)?;
        self.store.clear_if_held_by(resource, task_id)
    }

    /// Current state of every slot.
    pub fn snapshot(&self) -> Result<Vec<ResourceLockSlot>, LockError> {
        self.store.list()
    }

    pub fn slot(&self, resource: &str) -> Result<ResourceLockSlot, LockError> {
        self.store
            .get(resource)?
            .ok_or_else(|| LockError::UnknownResource(resource.to_string()))
    }

    /// Acquire `resource` and return a guard that releases it on drop.
    ///
    /// A busy slot is reported as [`LockError::Busy`].
    pub fn lock(&self, resource: &str, task_id: &str) -> Result<LockGuard<'_>, LockError> {
        match self.acquire(resource, task_id)? {
            LockOutcome::Busy(busy) => Err(LockError::Busy(busy)),
            LockOutcome::Acquired | LockOutcome::Reclaimed { .. } => Ok(LockGuard {
                manager: self,
                resource: resource.to_string(),
                task_id: task_id.to_string(),
                released: false,
            }),
        }
    }

    /// Run `op` while holding `resource`.
    ///
    /// The lock is released on every exit path of `op`: normal completion,
    /// an error value, a panic, or the returned future being dropped.
    pub async fn with_lock<F, T>(&self, resource: &str, task_id: &str, op: F) -> Result<T, LockError>
    where
        F: Future<Output = T>,
    {
        let guard = self.lock(resource, task_id)?;
        let output = op.await;
        guard.release()?;
        Ok(output)
    }
}

/// Holds a resource lock until released or dropped.
pub struct LockGuard<'a> {
    manager: &'a ResourceLockManager,
    resource: String,
    task_id: String,
    released: bool,
}

impl LockGuard<'_> {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Release now and surface any store error.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.manager.release(&self.resource, &self.task_id)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.manager.release(&self.resource, &self.task_id) {
            warn!(
                "Failed to release lock {} for {}: {}",
                self.resource, self.task_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::SqliteLockStore;
    use crate::testing::ManualClock;

    fn manager() -> (ResourceLockManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store: Arc<dyn LockStore> = Arc::new(SqliteLockStore::in_memory().unwrap());
        let manager = ResourceLockManager::new(store, LockConfig::default())
            .unwrap()
            .with_clock(clock.clone())
            .with_pid(4000);
        (manager, clock)
    }

    #[test]
    fn test_second_task_is_busy_while_holder_is_fresh() {
        let (manager, clock) = manager();

        assert_eq!(
            manager.acquire("script", "task-a").unwrap(),
            LockOutcome::Acquired
        );

        clock.advance(Duration::from_secs(599));
        match manager.acquire("script", "task-b").unwrap() {
            LockOutcome::Busy(busy) => {
                assert_eq!(busy.holder_task_id, "task-a");
                assert_eq!(busy.held_for, Duration::from_secs(599));
            }
            other => panic!("expected busy, got {:?}", other),
        }
    }

    #[test]
    fn test_zombie_lock_is_reclaimed_after_tier_timeout() {
        let (manager, clock) = manager();
        manager.acquire("script", "task-a").unwrap();

        clock.advance(Duration::from_secs(601));
        let outcome = manager.acquire("script", "task-b").unwrap();
        assert_eq!(
            outcome,
            LockOutcome::Reclaimed {
                previous_holder: "task-a".to_string(),
                held_for: Duration::from_secs(601),
            }
        );

        let slot = manager.slot("script").unwrap();
        assert_eq!(slot.holder_task_id.as_deref(), Some("task-b"));
        assert_eq!(slot.holder_pid, Some(4000));
    }

    #[test]
    fn test_long_tier_uses_long_timeout() {
        let (manager, clock) = manager();
        manager.acquire("video", "render-1").unwrap();

        clock.advance(Duration::from_secs(20 * 60));
        assert!(!manager.acquire("video", "render-2").unwrap().is_acquired());

        clock.advance(Duration::from_secs(11 * 60));
        assert!(manager.acquire("video", "render-2").unwrap().is_acquired());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (manager, _clock) = manager();
        manager.acquire("upload", "task-a").unwrap();

        manager.release("upload", "task-a").unwrap();
        manager.release("upload", "task-a").unwrap();

        let slot = manager.slot("upload").unwrap();
        assert_eq!(slot.holder_task_id, None);
        assert_eq!(slot.acquired_at, None);
        assert_eq!(slot.holder_pid, None);
    }

    #[test]
    fn test_reacquire_by_holder_succeeds() {
        let (manager, _clock) = manager();
        manager.acquire("image", "task-a").unwrap();
        assert_eq!(
            manager.acquire("image", "task-a").unwrap(),
            LockOutcome::Acquired
        );
    }

    #[test]
    fn test_unknown_resource() {
        let (manager, _clock) = manager();
        assert!(matches!(
            manager.acquire("printer", "t"),
            Err(LockError::UnknownResource(_))
        ));
        assert!(matches!(
            manager.release("printer", "t"),
            Err(LockError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (manager, _clock) = manager();
        {
            let guard = manager.lock("script", "task-a").unwrap();
            assert_eq!(guard.resource(), "script");
            assert!(matches!(
                manager.lock("script", "task-b"),
                Err(LockError::Busy(_))
            ));
        }
        assert!(!manager.slot("script").unwrap().is_held());
    }

    #[tokio::test]
    async fn test_with_lock_releases_after_error() {
        let (manager, _clock) = manager();

        let result: Result<Result<(), String>, LockError> = manager
            .with_lock("image", "task-a", async { Err("render failed".to_string()) })
            .await;

        assert_eq!(result.unwrap(), Err("render failed".to_string()));
        assert!(!manager.slot("image").unwrap().is_held());
    }

    #[tokio::test]
    async fn test_with_lock_busy_does_not_run_operation() {
        let (manager, _clock) = manager();
        manager.acquire("image", "holder").unwrap();

        let mut ran = false;
        let result = manager
            .with_lock("image", "task-b", async {
                ran = true;
            })
            .await;

        assert!(matches!(result, Err(LockError::Busy(_))));
        assert!(!ran);
        assert_eq!(
            manager.slot("image").unwrap().holder_task_id.as_deref(),
            Some("holder")
        );
    }

    #[test]
    fn test_release_if_held_by() {
        let (manager, _clock) = manager();
        manager.acquire("script", "task-a").unwrap();
        assert!(!manager.release_if_held_by("script", "task-b").unwrap());
        assert!(manager.release_if_held_by("script", "task-a").unwrap());
    }
}
