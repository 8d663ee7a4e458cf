//! Resource lock storage trait.

use chrono::{DateTime, Utc};

use super::{LockError, ResourceLockSlot};

/// Storage for the single-slot resource locks.
///
/// Every method is one atomic statement (or one write transaction) so that
/// several processes can share the table.
pub trait LockStore: Send + Sync {
    /// Create missing slot rows. Existing rows are left untouched.
    fn ensure_slots(&self, resources: &[&str]) -> Result<(), LockError>;

    fn get(&self, resource: &str) -> Result<Option<ResourceLockSlot>, LockError>;

    fn list(&self) -> Result<Vec<ResourceLockSlot>, LockError>;

    /// Set the holder if the slot is free. True iff exactly one row changed.
    fn try_acquire(
        &self,
        resource: &str,
        task_id: &str,
        pid: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, LockError>;

    /// Overwrite the holder, provided it is still `stale_holder` with the
    /// acquisition time `stale_since`.
    fn take_over(
        &self,
        resource: &str,
        task_id: &str,
        pid: u32,
        now: DateTime<Utc>,
        stale_holder: &str,
        stale_since: DateTime<Utc>,
    ) -> Result<bool, LockError>;

    /// Clear the slot whoever holds it. Returns the previous holder.
    fn clear(&self, resource: &str) -> Result<Option<String>, LockError>;

    /// Clear the slot only if `task_id` holds it.
    fn clear_if_held_by(&self, resource: &str, task_id: &str) -> Result<bool, LockError>;
}
