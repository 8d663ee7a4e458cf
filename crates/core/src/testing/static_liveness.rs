//! Liveness answered from a fixed set of pids.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::reconciler::ProcessLiveness;

/// Every pid is dead unless marked alive.
#[derive(Debug, Default)]
pub struct StaticLiveness {
    alive: RwLock<HashSet<u32>>,
}

impl StaticLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alive(pids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            alive: RwLock::new(pids.into_iter().collect()),
        }
    }

    pub fn set_alive(&self, pid: u32) {
        self.alive
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid);
    }

    pub fn set_dead(&self, pid: u32) {
        self.alive
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pid);
    }
}

impl ProcessLiveness for StaticLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&pid)
    }
}
