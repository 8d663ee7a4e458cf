//! Worker pool scaling.
//!
//! The scaler launches external agent processes while there is claimable
//! work, reserving a ticket for each launch, and retires idle workers once
//! the backlog is empty.

mod command;
mod config;
mod launcher;
mod pool;
mod runner;
mod types;

pub use command::{
    sanitize_summary, AgentCommand, SERVER_URL_ENV, TICKET_HINT_ENV, WORKER_ID_ENV,
};
pub use config::{AgentProfile, ScalerConfig};
pub use launcher::{ProcessLauncher, WorkerLauncher, WorkerProcess};
pub use pool::{WorkerPoolState, WorkerSlot};
pub use runner::WorkerPoolScaler;
pub use types::{
    ExitInfo, ScalerError, ScalerStatus, SlotState, SpawnedWorker, TickReport, WorkerInfo,
};
