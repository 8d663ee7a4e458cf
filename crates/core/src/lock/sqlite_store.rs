//! SQLite-backed resource lock table.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{LockError, LockStore, ResourceLockSlot};
use crate::db::{self, format_timestamp, parse_timestamp};

/// SQLite-backed lock store.
pub struct SqliteLockStore {
    conn: Mutex<Connection>,
}

impl SqliteLockStore {
    pub fn new(path: &Path) -> Result<Self, LockError> {
        Self::with_busy_timeout(path, db::DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, LockError> {
        let conn = db::open(path, busy_timeout)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, LockError> {
        let conn = db::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), LockError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS resource_locks (
                resource TEXT PRIMARY KEY,
                holder_task_id TEXT,
                acquired_at TEXT,
                holder_pid INTEGER
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LockError> {
        self.conn
            .lock()
            .map_err(|_| LockError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_slot(row: &rusqlite::Row) -> rusqlite::Result<ResourceLockSlot> {
        let resource: String = row.get(0)?;
        let holder_task_id: Option<String> = row.get(1)?;
        let acquired_at: Option<String> = row.get(2)?;
        let holder_pid: Option<i64> = row.get(3)?;

        Ok(ResourceLockSlot {
            resource,
            holder_task_id,
            acquired_at: acquired_at.as_deref().and_then(parse_timestamp),
            holder_pid: holder_pid.and_then(|pid| u32::try_from(pid).ok()),
        })
    }
}

impl LockStore for SqliteLockStore {
    fn ensure_slots(&self, resources: &[&str]) -> Result<(), LockError> {
        let conn = self.conn()?;
        for resource in resources {
            conn.execute(
                "INSERT OR IGNORE INTO resource_locks (resource) VALUES (?1)",
                params![resource],
            )?;
        }
        Ok(())
    }

    fn get(&self, resource: &str) -> Result<Option<ResourceLockSlot>, LockError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT resource, holder_task_id, acquired_at, holder_pid FROM resource_locks WHERE resource = ?1",
                params![resource],
                Self::row_to_slot,
            )
            .optional()?)
    }

    fn list(&self) -> Result<Vec<ResourceLockSlot>, LockError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT resource, holder_task_id, acquired_at, holder_pid FROM resource_locks ORDER BY resource",
        )?;
        let rows = stmt.query_map([], Self::row_to_slot)?;

        let mut slots = Vec::new();
        for row in rows {
            slots.push(row?);
        }
        Ok(slots)
    }

    fn try_acquire(
        &self,
        resource: &str,
        task_id: &str,
        pid: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE resource_locks SET holder_task_id = ?1, acquired_at = ?2, holder_pid = ?3 WHERE resource = ?4 AND holder_task_id IS NULL",
            params![task_id, format_timestamp(now), i64::from(pid), resource],
        )?;
        Ok(updated == 1)
    }

    fn take_over(
        &self,
        resource: &str,
        task_id: &str,
        pid: u32,
        now: DateTime<Utc>,
        stale_holder: &str,
        stale_since: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE resource_locks SET holder_task_id = ?1, acquired_at = ?2, holder_pid = ?3 WHERE resource = ?4 AND holder_task_id = ?5 AND acquired_at = ?6",
            params![
                task_id,
                format_timestamp(now),
                i64::from(pid),
                resource,
                stale_holder,
                format_timestamp(stale_since)
            ],
        )?;
        Ok(updated == 1)
    }

    fn clear(&self, resource: &str) -> Result<Option<String>, LockError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT holder_task_id FROM resource_locks WHERE resource = ?1",
                params![resource],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();

        tx.execute(
            "UPDATE resource_locks SET holder_task_id = NULL, acquired_at = NULL, holder_pid = NULL WHERE resource = ?1",
            params![resource],
        )?;
        tx.commit()?;

        Ok(previous)
    }

    fn clear_if_held_by(&self, resource: &str, task_id: &str) -> Result<bool, LockError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE resource_locks SET holder_task_id = NULL, acquired_at = NULL, holder_pid = NULL WHERE resource = ?1 AND holder_task_id = ?2",
            params![resource, task_id],
        )?;
        Ok(updated == 1)
    }
}
