//! Conflict backoff.
//!
//! When a task finds a resource held by another, it waits for the holder to
//! finish instead of failing outright, then retries once.

mod config;
mod protocol;
mod remote;
mod status;
mod types;

pub use config::BackoffConfig;
pub use protocol::ConflictBackoff;
pub use remote::{RemoteAcquire, RemoteLockClient, RemoteLockGrant};
pub use status::{HolderStatusResponse, HttpHolderStatus, StoreHolderStatus};
pub use types::{
    BackoffError, CancellationCheck, HolderStatus, HolderStatusSource, NeverCancelled,
    ResourceBusy,
};
