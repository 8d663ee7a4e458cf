//! Orphan reconciliation.
//!
//! Claims and lock slots record the pid of the process that took them. The
//! reconciler periodically checks those pids and returns the work of dead
//! processes to the pool.

mod config;
mod liveness;
mod runner;
mod types;

pub use config::ReconcilerConfig;
pub use liveness::{OsProcessLiveness, ProcessLiveness};
pub use runner::OrphanReconciler;
pub use types::{ReconcileError, ReconcileReport, ReconcilerStatus};
