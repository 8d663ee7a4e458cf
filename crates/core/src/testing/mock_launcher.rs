//! Mock worker launcher for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::scaler::{AgentCommand, ExitInfo, ScalerError, WorkerLauncher, WorkerProcess};

const FIRST_PID: u32 = 40_000;

#[derive(Debug, Default)]
struct LaunchState {
    next_pid: u32,
    launched: Vec<AgentCommand>,
    failures_remaining: u32,
    exited: HashMap<u32, i32>,
    killed: Vec<u32>,
}

/// Mock implementation of the WorkerLauncher trait.
///
/// Records every command, hands out fake pids, and lets tests decide when
/// processes exit or launches fail.
///
/// # Example
///
/// ```rust,ignore
/// let launcher = Arc::new(MockLauncher::new());
/// launcher.fail_next(1);
/// let scaler = WorkerPoolScaler::new(config, store, launcher.clone());
/// scaler.tick().await?; // spawn fails, ticket released
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    state: Arc<Mutex<LaunchState>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LaunchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `count` launches fail.
    pub fn fail_next(&self, count: u32) {
        self.state().failures_remaining = count;
    }

    /// Commands launched successfully, in order.
    pub fn launched(&self) -> Vec<AgentCommand> {
        self.state().launched.clone()
    }

    /// Simulate the process with `pid` exiting.
    pub fn exit(&self, pid: u32, code: i32) {
        self.state().exited.insert(pid, code);
    }

    /// Pids that were sent a kill.
    pub fn killed(&self) -> Vec<u32> {
        self.state().killed.clone()
    }
}

impl WorkerLauncher for MockLauncher {
    fn launch(&self, command: &AgentCommand) -> Result<Box<dyn WorkerProcess>, ScalerError> {
        let mut state = self.state();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(ScalerError::SpawnFailure {
                profile: command.program().to_string(),
                message: "simulated launch failure".to_string(),
            });
        }

        let pid = FIRST_PID + state.next_pid;
        state.next_pid += 1;
        state.launched.push(command.clone());

        Ok(Box::new(MockWorkerProcess {
            pid,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockWorkerProcess {
    pid: u32,
    state: Arc<Mutex<LaunchState>>,
}

impl WorkerProcess for MockWorkerProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_exited(&mut self) -> Result<Option<ExitInfo>, ScalerError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(code) = state.exited.get(&self.pid) {
            return Ok(Some(ExitInfo {
                code: Some(*code),
                success: *code == 0,
            }));
        }
        if state.killed.contains(&self.pid) {
            return Ok(Some(ExitInfo {
                code: None,
                success: false,
            }));
        }
        Ok(None)
    }

    fn kill(&mut self) -> Result<(), ScalerError> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .killed
            .push(self.pid);
        Ok(())
    }
}
