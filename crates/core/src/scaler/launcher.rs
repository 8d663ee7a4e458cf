//! Launching and observing agent processes.

use tokio::process::Child;
use tracing::debug;

use super::{AgentCommand, ExitInfo, ScalerError};

/// Handle on a launched worker.
pub trait WorkerProcess: Send {
    fn pid(&self) -> u32;

    /// Non-blocking exit check.
    fn try_exited(&mut self) -> Result<Option<ExitInfo>, ScalerError>;

    /// Ask the process to terminate. Does not wait.
    fn kill(&mut self) -> Result<(), ScalerError>;
}

/// Starts worker processes.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, command: &AgentCommand) -> Result<Box<dyn WorkerProcess>, ScalerError>;
}

/// Launches real OS processes through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, command: &AgentCommand) -> Result<Box<dyn WorkerProcess>, ScalerError> {
        let child = command.to_command().spawn().map_err(|e| ScalerError::SpawnFailure {
            profile: command.program().to_string(),
            message: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| ScalerError::SpawnFailure {
            profile: command.program().to_string(),
            message: "process exited before its pid was read".to_string(),
        })?;

        debug!("Launched {} as pid {}", command.program(), pid);
        Ok(Box::new(ChildProcess { child, pid }))
    }
}

struct ChildProcess {
    child: Child,
    pid: u32,
}

impl WorkerProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_exited(&mut self) -> Result<Option<ExitInfo>, ScalerError> {
        let status = self
            .child
            .try_wait()
            .map_err(|e| ScalerError::Process(format!("pid {}: {}", self.pid, e)))?;

        Ok(status.map(|status| ExitInfo {
            code: status.code(),
            success: status.success(),
        }))
    }

    fn kill(&mut self) -> Result<(), ScalerError> {
        self.child
            .start_kill()
            .map_err(|e| ScalerError::Process(format!("pid {}: {}", self.pid, e)))
    }
}
