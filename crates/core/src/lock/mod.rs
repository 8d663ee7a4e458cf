//! Named resource locks.
//!
//! Each resource has a single-slot row in the lock table. A holder that
//! exceeds its tier timeout is presumed dead and may be displaced.

mod config;
mod manager;
mod sqlite_store;
mod store;
mod types;

pub use config::{LockConfig, LockTier, ResourceSpec};
pub use manager::{LockGuard, ResourceLockManager};
pub use sqlite_store::SqliteLockStore;
pub use store::LockStore;
pub use types::{LockBusy, LockError, LockOutcome, ResourceLockSlot};
