//! In-memory worker pool state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::{ExitInfo, SlotState, WorkerInfo, WorkerProcess};
use crate::ticket::TicketId;

/// A worker the scaler launched and still tracks.
pub struct WorkerSlot {
    pub worker_id: String,
    pub profile: String,
    pub ticket_id: Option<TicketId>,
    pub spawned_at: DateTime<Utc>,
    pub state: SlotState,
    process: Box<dyn WorkerProcess>,
}

impl WorkerSlot {
    pub fn new(
        worker_id: String,
        profile: String,
        ticket_id: Option<TicketId>,
        process: Box<dyn WorkerProcess>,
    ) -> Self {
        Self {
            worker_id,
            profile,
            ticket_id,
            spawned_at: Utc::now(),
            state: SlotState::Spawning,
            process,
        }
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            worker_id: self.worker_id.clone(),
            profile: self.profile.clone(),
            pid: self.pid(),
            ticket_id: self.ticket_id,
            state: self.state,
            spawned_at: self.spawned_at,
        }
    }
}

/// Tracked workers plus per-profile failure bookkeeping.
///
/// Never persisted; rebuilt from nothing on restart while orphaned tickets
/// are left to the reconciler.
#[derive(Default)]
pub struct WorkerPoolState {
    slots: BTreeMap<String, WorkerSlot>,
    failures: HashMap<String, u32>,
    disabled: BTreeSet<String>,
}

impl WorkerPoolState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: WorkerSlot) {
        self.slots.insert(slot.worker_id.clone(), slot);
    }

    pub fn get_mut(&mut self, worker_id: &str) -> Option<&mut WorkerSlot> {
        self.slots.get_mut(worker_id)
    }

    pub fn live_count(&self) -> usize {
        self.slots.values().filter(|s| s.state.is_live()).count()
    }

    pub fn live_count_for(&self, profile: &str) -> usize {
        self.slots
            .values()
            .filter(|s| s.state.is_live() && s.profile == profile)
            .count()
    }

    /// Remove workers whose process has exited.
    pub fn reap(&mut self) -> Vec<(WorkerSlot, ExitInfo)> {
        let mut exited = Vec::new();
        for slot in self.slots.values_mut() {
            match slot.process.try_exited() {
                Ok(Some(info)) => {
                    slot.state = SlotState::Exited;
                    exited.push((slot.worker_id.clone(), info));
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to poll worker {}: {}", slot.worker_id, e),
            }
        }

        exited
            .into_iter()
            .filter_map(|(id, info)| self.slots.remove(&id).map(|slot| (slot, info)))
            .collect()
    }

    /// Terminate a worker and stop tracking it.
    pub fn kill(&mut self, worker_id: &str) -> Option<WorkerSlot> {
        let mut slot = self.slots.remove(worker_id)?;
        if let Err(e) = slot.process.kill() {
            warn!("Failed to kill worker {}: {}", worker_id, e);
        }
        slot.state = SlotState::Killed;
        Some(slot)
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.slots.values().map(WorkerSlot::info).collect()
    }

    /// Record a spawn failure. Returns the new consecutive count.
    pub fn record_failure(&mut self, profile: &str) -> u32 {
        let count = self.failures.entry(profile.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(&mut self, profile: &str) {
        self.failures.remove(profile);
    }

    pub fn failures(&self, profile: &str) -> u32 {
        self.failures.get(profile).copied().unwrap_or(0)
    }

    pub fn disable(&mut self, profile: &str) {
        self.disabled.insert(profile.to_string());
    }

    /// Re-enable a profile and clear its failure count.
    pub fn enable(&mut self, profile: &str) -> bool {
        self.failures.remove(profile);
        self.disabled.remove(profile)
    }

    pub fn is_disabled(&self, profile: &str) -> bool {
        self.disabled.contains(profile)
    }

    pub fn disabled_profiles(&self) -> Vec<String> {
        self.disabled.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler::{AgentCommand, WorkerLauncher};
    use crate::testing::MockLauncher;

    fn slot(launcher: &MockLauncher, id: &str, profile: &str) -> WorkerSlot {
        let process = launcher.launch(&AgentCommand::new("agent")).unwrap();
        WorkerSlot::new(id.to_string(), profile.to_string(), None, process)
    }

    #[test]
    fn test_counts_by_profile() {
        let launcher = MockLauncher::new();
        let mut pool = WorkerPoolState::new();
        pool.insert(slot(&launcher, "w1", "fixer"));
        pool.insert(slot(&launcher, "w2", "fixer"));
        pool.insert(slot(&launcher, "w3", "builder"));

        assert_eq!(pool.live_count(), 3);
        assert_eq!(pool.live_count_for("fixer"), 2);
        assert_eq!(pool.live_count_for("builder"), 1);
    }

    #[test]
    fn test_reap_removes_exited() {
        let launcher = MockLauncher::new();
        let mut pool = WorkerPoolState::new();
        let first = slot(&launcher, "w1", "fixer");
        let pid = first.pid();
        pool.insert(first);
        pool.insert(slot(&launcher, "w2", "fixer"));

        launcher.exit(pid, 0);
        let reaped = pool.reap();

        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].0.worker_id, "w1");
        assert_eq!(reaped[0].0.state, SlotState::Exited);
        assert!(reaped[0].1.success);
        assert_eq!(pool.worker_ids(), vec!["w2".to_string()]);
    }

    #[test]
    fn test_kill() {
        let launcher = MockLauncher::new();
        let mut pool = WorkerPoolState::new();
        let worker = slot(&launcher, "w1", "fixer");
        let pid = worker.pid();
        pool.insert(worker);

        let killed = pool.kill("w1").unwrap();
        assert_eq!(killed.state, SlotState::Killed);
        assert_eq!(launcher.killed(), vec![pid]);
        assert_eq!(pool.live_count(), 0);
        assert!(pool.kill("w1").is_none());
    }

    #[test]
    fn test_failure_bookkeeping() {
        let mut pool = WorkerPoolState::new();
        assert_eq!(pool.record_failure("fixer"), 1);
        assert_eq!(pool.record_failure("fixer"), 2);
        pool.record_success("fixer");
        assert_eq!(pool.failures("fixer"), 0);

        pool.disable("fixer");
        assert!(pool.is_disabled("fixer"));
        assert_eq!(pool.disabled_profiles(), vec!["fixer".to_string()]);
        assert!(pool.enable("fixer"));
        assert!(!pool.is_disabled("fixer"));
    }
}
