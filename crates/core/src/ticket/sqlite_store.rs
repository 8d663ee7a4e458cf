//! SQLite-backed ticket store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{json, Value};

use super::store::truncate_failure_message;
use super::{
    ClaimedTicket, CreateTicketRequest, Priority, Ticket, TicketError, TicketFilter, TicketId,
    TicketKind, TicketStatus, TicketStore,
};
use crate::db::{self, format_timestamp, parse_timestamp};

const TICKET_COLUMNS: &str = "id, kind, priority, title, summary, metadata, status, assigned_to, \
     worker_pid, created_by, resolution_note, created_at, updated_at, resolved_at";

/// SQLite-backed ticket store.
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
}

impl SqliteTicketStore {
    /// Create a new SQLite ticket store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TicketError> {
        Self::with_busy_timeout(path, db::DEFAULT_BUSY_TIMEOUT)
    }

    /// Open the store with an explicit wait for the database write lock.
    pub fn with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, TicketError> {
        let conn = db::open(path, busy_timeout)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite ticket store (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let conn = db::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TicketError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 2,
                title TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'open',
                assigned_to TEXT,
                worker_pid INTEGER,
                created_by TEXT NOT NULL,
                resolution_note TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resolved_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_claim ON tickets(status, priority, created_at);
            CREATE INDEX IF NOT EXISTS idx_tickets_title ON tickets(title);
            CREATE INDEX IF NOT EXISTS idx_tickets_assigned_to ON tickets(assigned_to);
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, TicketError> {
        self.conn
            .lock()
            .map_err(|_| TicketError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &TicketFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }

        if let Some(ref assigned_to) = filter.assigned_to {
            conditions.push("assigned_to = ?");
            params.push(Box::new(assigned_to.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
        let id: i64 = row.get(0)?;
        let kind_str: String = row.get(1)?;
        let priority_rank: i64 = row.get(2)?;
        let title: String = row.get(3)?;
        let summary: String = row.get(4)?;
        let metadata_json: String = row.get(5)?;
        let status_str: String = row.get(6)?;
        let assigned_to: Option<String> = row.get(7)?;
        let worker_pid: Option<i64> = row.get(8)?;
        let created_by: String = row.get(9)?;
        let resolution_note: Option<String> = row.get(10)?;
        let created_at_str: String = row.get(11)?;
        let updated_at_str: String = row.get(12)?;
        let resolved_at_str: Option<String> = row.get(13)?;

        let kind: TicketKind = kind_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
        let status: TicketStatus = status_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?;

        let metadata: Value = serde_json::from_str(&metadata_json).unwrap_or_else(|_| json!({}));

        Ok(Ticket {
            id: TicketId(id),
            kind,
            priority: Priority::from_rank(priority_rank).unwrap_or_default(),
            title,
            summary,
            metadata,
            status,
            assigned_to,
            worker_pid: worker_pid.and_then(|pid| u32::try_from(pid).ok()),
            created_by,
            resolution_note,
            created_at: parse_timestamp(&created_at_str).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(&updated_at_str).unwrap_or_else(Utc::now),
            resolved_at: resolved_at_str.as_deref().and_then(parse_timestamp),
        })
    }

    fn fetch(conn: &Connection, id: TicketId) -> Result<Option<Ticket>, TicketError> {
        let sql = format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id.0], Self::row_to_ticket)
            .optional()?)
    }

    fn write_metadata(metadata: &Value) -> Result<String, TicketError> {
        serde_json::to_string(metadata).map_err(|e| TicketError::Database(e.to_string()))
    }
}

/// Force metadata into a JSON object.
fn normalize_metadata(metadata: Value) -> Value {
    match metadata {
        Value::Object(_) => metadata,
        Value::Null => json!({}),
        other => json!({ "value": other }),
    }
}

/// Push `entry` onto the array at `metadata[key]`, creating it if needed.
fn append_entry(metadata: &mut Value, key: &str, entry: Value) {
    if !metadata.is_object() {
        *metadata = json!({});
    }
    if let Some(map) = metadata.as_object_mut() {
        let slot = map.entry(key.to_string()).or_insert_with(|| json!([]));
        if !slot.is_array() {
            *slot = json!([]);
        }
        if let Some(items) = slot.as_array_mut() {
            items.push(entry);
        }
    }
}

fn failure_entry(now: DateTime<Utc>, worker: Option<&str>, error: &str) -> Value {
    json!({
        "timestamp": format_timestamp(now),
        "worker": worker,
        "error": truncate_failure_message(error),
    })
}

impl TicketStore for SqliteTicketStore {
    fn create(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(id) = request.id {
            if let Some(existing) = Self::fetch(&tx, id)? {
                return Ok(existing);
            }
        }

        let duplicate: Option<i64> = tx
            .query_row(
                "SELECT id FROM tickets WHERE title = ?1 AND status IN ('open', 'in_progress') ORDER BY id LIMIT 1",
                params![request.title],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_id) = duplicate {
            return Err(TicketError::DuplicateTicket {
                existing_id: TicketId(existing_id),
            });
        }

        let now = format_timestamp(Utc::now());
        let metadata_json = Self::write_metadata(&normalize_metadata(request.metadata))?;

        tx.execute(
            "INSERT INTO tickets (id, kind, priority, title, summary, metadata, status, created_by, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'open', ?7, ?8, ?8)",
            params![
                request.id.map(TicketId::value),
                request.kind.as_str(),
                request.priority.rank(),
                request.title,
                request.summary,
                metadata_json,
                request.created_by,
                now,
            ],
        )?;

        let id = TicketId(tx.last_insert_rowid());
        let ticket = Self::fetch(&tx, id)?.ok_or(TicketError::NotFound(id))?;
        tx.commit()?;

        Ok(ticket)
    }

    fn get(&self, id: TicketId) -> Result<Option<Ticket>, TicketError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM tickets {} ORDER BY {} LIMIT ? OFFSET ?",
            TICKET_COLUMNS,
            where_clause,
            filter.order.sql()
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_ticket)?;

        let mut tickets = Vec::new();
        for row_result in rows {
            tickets.push(row_result?);
        }

        Ok(tickets)
    }

    fn count(&self, filter: &TicketFilter) -> Result<i64, TicketError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM tickets {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn count_claimable(&self, kind: Option<TicketKind>) -> Result<i64, TicketError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tickets WHERE status = 'open' AND assigned_to IS NULL AND (?1 IS NULL OR kind = ?1)",
            params![kind.map(|k| k.as_str())],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn claim(
        &self,
        worker_id: &str,
        worker_pid: u32,
        kind: Option<TicketKind>,
    ) -> Result<Option<Ticket>, TicketError> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front, so the select and the
        // update below cannot interleave with another claimer.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = format_timestamp(Utc::now());

        let sql = format!(
            "UPDATE tickets
                SET status = 'in_progress',
                    assigned_to = ?1,
                    worker_pid = ?2,
                    updated_at = ?3,
                    metadata = json_set(metadata, '$.claimed_at', ?3, '$.claimed_by', ?1)
              WHERE id = (
                    SELECT id FROM tickets
                     WHERE status = 'open' AND assigned_to IS NULL
                       AND (?4 IS NULL OR kind = ?4)
                     ORDER BY priority ASC, created_at ASC, id ASC
                     LIMIT 1)
                AND status = 'open' AND assigned_to IS NULL
              RETURNING {}",
            TICKET_COLUMNS
        );

        let ticket = tx
            .query_row(
                &sql,
                params![worker_id, i64::from(worker_pid), now, kind.map(|k| k.as_str())],
                Self::row_to_ticket,
            )
            .optional()?;

        tx.commit()?;
        Ok(ticket)
    }

    fn set_status(
        &self,
        id: TicketId,
        worker_id: &str,
        status: TicketStatus,
        note: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = Self::fetch(&tx, id)?.ok_or(TicketError::NotFound(id))?;

        if current.status.is_final() {
            return Err(TicketError::AlreadyTerminal {
                ticket_id: id,
                status: current.status,
            });
        }

        if let Some(ref assignee) = current.assigned_to {
            if assignee != worker_id {
                return Err(TicketError::AssignedToOther {
                    ticket_id: id,
                    current: assignee.clone(),
                });
            }
        }

        // Entering in_progress needs a pid, which only claim() records.
        let invalid = match status {
            TicketStatus::Cancelled => true,
            TicketStatus::InProgress => current.status != TicketStatus::InProgress,
            _ => false,
        };
        if invalid {
            return Err(TicketError::InvalidStatus {
                ticket_id: id,
                status,
                operation: "set status of".to_string(),
            });
        }

        let now = Utc::now();
        let mut metadata = current.metadata.clone();
        if let Some(note) = note {
            append_entry(
                &mut metadata,
                "notes",
                json!({ "worker": worker_id, "note": note, "at": format_timestamp(now) }),
            );
        }

        let (assigned_to, worker_pid) = match status {
            TicketStatus::Open => (None, None),
            TicketStatus::InProgress => (Some(worker_id.to_string()), current.worker_pid),
            _ => (
                current
                    .assigned_to
                    .clone()
                    .or_else(|| Some(worker_id.to_string())),
                None,
            ),
        };

        let resolution_note = match status {
            TicketStatus::Resolved | TicketStatus::Closed => note
                .map(str::to_string)
                .or_else(|| current.resolution_note.clone()),
            _ => current.resolution_note.clone(),
        };

        let resolved_at = if status.is_terminal() {
            Some(format_timestamp(now))
        } else {
            None
        };

        tx.execute(
            "UPDATE tickets SET status = ?1, assigned_to = ?2, worker_pid = ?3, metadata = ?4, resolution_note = ?5, resolved_at = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                status.as_str(),
                assigned_to,
                worker_pid.map(i64::from),
                Self::write_metadata(&metadata)?,
                resolution_note,
                resolved_at,
                format_timestamp(now),
                id.0,
            ],
        )?;

        let ticket = Self::fetch(&tx, id)?.ok_or(TicketError::NotFound(id))?;
        tx.commit()?;
        Ok(ticket)
    }

    fn release(
        &self,
        id: TicketId,
        worker_id: &str,
        error: Option<&str>,
    ) -> Result<bool, TicketError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = match Self::fetch(&tx, id)? {
            Some(ticket) => ticket,
            None => return Err(TicketError::NotFound(id)),
        };

        if current.status != TicketStatus::InProgress
            || current.assigned_to.as_deref() != Some(worker_id)
        {
            return Ok(false);
        }

        let now = Utc::now();
        let mut metadata = current.metadata;
        if let Some(error) = error {
            append_entry(
                &mut metadata,
                "failure_history",
                failure_entry(now, Some(worker_id), error),
            );
        }

        let updated = tx.execute(
            "UPDATE tickets SET status = 'open', assigned_to = NULL, worker_pid = NULL, metadata = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'in_progress' AND assigned_to = ?4",
            params![
                Self::write_metadata(&metadata)?,
                format_timestamp(now),
                id.0,
                worker_id,
            ],
        )?;

        tx.commit()?;
        Ok(updated == 1)
    }

    fn hand_over(
        &self,
        id: TicketId,
        from_worker: &str,
        to_worker: &str,
        worker_pid: u32,
    ) -> Result<bool, TicketError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE tickets
                SET assigned_to = ?1,
                    worker_pid = ?2,
                    updated_at = ?3,
                    metadata = json_set(metadata, '$.claimed_by', ?1)
              WHERE id = ?4 AND status = 'in_progress' AND assigned_to = ?5",
            params![
                to_worker,
                i64::from(worker_pid),
                format_timestamp(Utc::now()),
                id.0,
                from_worker,
            ],
        )?;
        Ok(updated == 1)
    }

    fn cancel(&self, id: TicketId, reason: Option<&str>) -> Result<Ticket, TicketError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = Self::fetch(&tx, id)?.ok_or(TicketError::NotFound(id))?;
        if current.status.is_final() {
            return Err(TicketError::AlreadyTerminal {
                ticket_id: id,
                status: current.status,
            });
        }

        let now = Utc::now();
        let mut metadata = current.metadata;
        append_entry(
            &mut metadata,
            "notes",
            json!({
                "worker": "operator",
                "note": reason.unwrap_or("cancelled"),
                "at": format_timestamp(now),
            }),
        );

        tx.execute(
            "UPDATE tickets SET status = 'cancelled', worker_pid = NULL, metadata = ?1, resolution_note = ?2, resolved_at = ?3, updated_at = ?3 WHERE id = ?4",
            params![
                Self::write_metadata(&metadata)?,
                reason,
                format_timestamp(now),
                id.0,
            ],
        )?;

        let ticket = Self::fetch(&tx, id)?.ok_or(TicketError::NotFound(id))?;
        tx.commit()?;
        Ok(ticket)
    }

    fn list_claimed(&self) -> Result<Vec<ClaimedTicket>, TicketError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, assigned_to, worker_pid FROM tickets WHERE status = 'in_progress' AND worker_pid IS NOT NULL ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut claimed = Vec::new();
        for row in rows {
            let (id, assigned_to, pid) = row?;
            // A negative or oversized pid cannot name a live process; keep it
            // visible to the reconciler as pid 0, which is never alive.
            claimed.push(ClaimedTicket {
                id: TicketId(id),
                assigned_to,
                worker_pid: u32::try_from(pid).unwrap_or(0),
            });
        }
        Ok(claimed)
    }

    fn reset_orphan(
        &self,
        id: TicketId,
        expected_pid: u32,
        reason: &str,
    ) -> Result<bool, TicketError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = match Self::fetch(&tx, id)? {
            Some(ticket) => ticket,
            None => return Ok(false),
        };

        if current.status != TicketStatus::InProgress {
            return Ok(false);
        }

        let now = Utc::now();
        let mut metadata = current.metadata;
        append_entry(
            &mut metadata,
            "failure_history",
            failure_entry(now, current.assigned_to.as_deref(), reason),
        );

        let updated = tx.execute(
            "UPDATE tickets SET status = 'open', assigned_to = NULL, worker_pid = NULL, metadata = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'in_progress' AND COALESCE(worker_pid, 0) = ?4",
            params![
                Self::write_metadata(&metadata)?,
                format_timestamp(now),
                id.0,
                i64::from(expected_pid),
            ],
        )?;

        tx.commit()?;
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteTicketStore {
        SqliteTicketStore::in_memory().unwrap()
    }

    fn create_test_request(title: &str) -> CreateTicketRequest {
        CreateTicketRequest::new(TicketKind::Defect, title, "Crash when saving\nthe \"draft\"")
            .with_created_by("log-watcher")
    }

    #[test]
    fn test_create_ticket() {
        let store = create_test_store();
        let ticket = store.create(create_test_request("Save crashes")).unwrap();

        assert_eq!(ticket.id, TicketId(1));
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.priority, Priority::P2);
        assert_eq!(ticket.created_by, "log-watcher");
        assert!(ticket.assigned_to.is_none());
        assert!(ticket.worker_pid.is_none());
        assert!(ticket.is_claimable());
        assert_eq!(ticket.metadata, json!({}));
    }

    #[test]
    fn test_create_with_explicit_id_is_idempotent() {
        let store = create_test_store();
        let first = store
            .create(create_test_request("Explicit").with_id(TicketId(500)))
            .unwrap();
        let second = store
            .create(
                CreateTicketRequest::new(TicketKind::ChangeRequest, "Different", "")
                    .with_id(TicketId(500)),
            )
            .unwrap();

        assert_eq!(first.id, TicketId(500));
        assert_eq!(second, first);
        assert_eq!(store.count(&TicketFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_active_title_is_rejected() {
        let store = create_test_store();
        let original = store.create(create_test_request("Same title")).unwrap();

        let err = store.create(create_test_request("Same title")).unwrap_err();
        match err {
            TicketError::DuplicateTicket { existing_id } => assert_eq!(existing_id, original.id),
            other => panic!("expected DuplicateTicket, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_title_allowed_after_resolution() {
        let store = create_test_store();
        let original = store.create(create_test_request("Recurring")).unwrap();
        store
            .set_status(original.id, "w1", TicketStatus::Resolved, Some("fixed"))
            .unwrap();

        let again = store.create(create_test_request("Recurring")).unwrap();
        assert_ne!(again.id, original.id);
    }

    #[test]
    fn test_non_object_metadata_is_wrapped() {
        let store = create_test_store();
        let ticket = store
            .create(create_test_request("Meta").with_metadata(json!([1, 2])))
            .unwrap();
        assert_eq!(ticket.metadata, json!({ "value": [1, 2] }));
    }

    #[test]
    fn test_get_nonexistent_ticket() {
        let store = create_test_store();
        assert!(store.get(TicketId(99)).unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first_with_filters() {
        let store = create_test_store();
        store.create(create_test_request("one")).unwrap();
        store
            .create(CreateTicketRequest::new(TicketKind::ChangeRequest, "two", ""))
            .unwrap();
        let third = store.create(create_test_request("three")).unwrap();
        store
            .set_status(third.id, "w1", TicketStatus::WontFix, None)
            .unwrap();

        let all = store.list(&TicketFilter::new()).unwrap();
        let titles: Vec<_> = all.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["three", "two", "one"]);

        let open = store
            .list(&TicketFilter::new().with_status(TicketStatus::Open))
            .unwrap();
        assert_eq!(open.len(), 2);

        let requests = store
            .list(&TicketFilter::new().with_kind(TicketKind::ChangeRequest))
            .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].title, "two");

        let page = store
            .list(&TicketFilter::new().with_limit(1).with_offset(1))
            .unwrap();
        assert_eq!(page[0].title, "two");
    }

    #[test]
    fn test_list_by_last_update() {
        let store = create_test_store();
        let first = store.create(create_test_request("one")).unwrap();
        store.create(create_test_request("two")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let claimed = store.claim("w1", 1, None).unwrap().unwrap();
        assert_eq!(claimed.id, first.id);

        let by_created = store.list(&TicketFilter::new()).unwrap();
        assert_eq!(by_created[0].title, "two");

        let by_updated = store
            .list(&TicketFilter::new().with_order(crate::ticket::TicketOrder::Updated))
            .unwrap();
        let titles: Vec<_> = by_updated.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["one", "two"]);
    }

    #[test]
    fn test_claim_orders_by_priority_then_age() {
        let store = create_test_store();
        let low = store
            .create(create_test_request("low").with_priority(Priority::P3))
            .unwrap();
        let urgent_old = store
            .create(create_test_request("urgent old").with_priority(Priority::P0))
            .unwrap();
        let urgent_new = store
            .create(create_test_request("urgent new").with_priority(Priority::P0))
            .unwrap();

        let order: Vec<TicketId> = (0..3)
            .map(|i| {
                store
                    .claim(&format!("w{}", i), 100 + i, None)
                    .unwrap()
                    .unwrap()
                    .id
            })
            .collect();

        assert_eq!(order, vec![urgent_old.id, urgent_new.id, low.id]);
        assert!(store.claim("w9", 109, None).unwrap().is_none());
    }

    #[test]
    fn test_claim_sets_assignment_and_metadata() {
        let store = create_test_store();
        store.create(create_test_request("claim me")).unwrap();

        let ticket = store.claim("worker-a", 4242, None).unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::InProgress);
        assert_eq!(ticket.assigned_to.as_deref(), Some("worker-a"));
        assert_eq!(ticket.worker_pid, Some(4242));
        assert_eq!(ticket.metadata["claimed_by"], "worker-a");
        assert!(ticket.metadata["claimed_at"].is_string());
        assert_eq!(store.count_claimable(None).unwrap(), 0);
    }

    #[test]
    fn test_claim_respects_kind_filter() {
        let store = create_test_store();
        store.create(create_test_request("defect")).unwrap();
        let change = store
            .create(CreateTicketRequest::new(TicketKind::ChangeRequest, "change", ""))
            .unwrap();

        assert_eq!(store.count_claimable(Some(TicketKind::ChangeRequest)).unwrap(), 1);
        let claimed = store
            .claim("w", 1, Some(TicketKind::ChangeRequest))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, change.id);
        assert!(store
            .claim("w", 1, Some(TicketKind::ChangeRequest))
            .unwrap()
            .is_none());
        assert_eq!(store.count_claimable(None).unwrap(), 1);
    }

    #[test]
    fn test_set_status_from_other_worker_leaves_ticket_unchanged() {
        let store = create_test_store();
        store.create(create_test_request("contested")).unwrap();
        let claimed = store.claim("worker-b", 200, None).unwrap().unwrap();

        let err = store
            .set_status(claimed.id, "worker-a", TicketStatus::Resolved, Some("done"))
            .unwrap_err();
        assert!(matches!(err, TicketError::AssignedToOther { ref current, .. } if current == "worker-b"));

        let after = store.get(claimed.id).unwrap().unwrap();
        assert_eq!(after, claimed);
    }

    #[test]
    fn test_set_status_on_final_ticket_fails() {
        let store = create_test_store();
        store.create(create_test_request("final")).unwrap();
        let claimed = store.claim("w1", 1, None).unwrap().unwrap();
        store
            .set_status(claimed.id, "w1", TicketStatus::Closed, None)
            .unwrap();

        let err = store
            .set_status(claimed.id, "w1", TicketStatus::Open, None)
            .unwrap_err();
        assert!(matches!(
            err,
            TicketError::AlreadyTerminal {
                status: TicketStatus::Closed,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_preserves_assignee_clears_pid_and_records_note() {
        let store = create_test_store();
        store.create(create_test_request("resolve")).unwrap();
        let claimed = store.claim("w1", 77, None).unwrap().unwrap();

        let resolved = store
            .set_status(claimed.id, "w1", TicketStatus::Resolved, Some("patched"))
            .unwrap();

        assert_eq!(resolved.status, TicketStatus::Resolved);
        assert_eq!(resolved.assigned_to.as_deref(), Some("w1"));
        assert_eq!(resolved.worker_pid, None);
        assert_eq!(resolved.resolution_note.as_deref(), Some("patched"));
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.metadata["notes"][0]["worker"], "w1");
        assert_eq!(resolved.metadata["notes"][0]["note"], "patched");
        assert!(store.list_claimed().unwrap().is_empty());
    }

    #[test]
    fn test_set_status_open_clears_assignment() {
        let store = create_test_store();
        store.create(create_test_request("reopen")).unwrap();
        let claimed = store.claim("w1", 77, None).unwrap().unwrap();

        let reopened = store
            .set_status(claimed.id, "w1", TicketStatus::Open, Some("giving up"))
            .unwrap();
        assert!(reopened.is_claimable());
        assert_eq!(reopened.worker_pid, None);
    }

    #[test]
    fn test_set_status_cannot_enter_in_progress_without_claim() {
        let store = create_test_store();
        let ticket = store.create(create_test_request("no pid")).unwrap();
        let err = store
            .set_status(ticket.id, "w1", TicketStatus::InProgress, None)
            .unwrap_err();
        assert!(matches!(err, TicketError::InvalidStatus { .. }));
    }

    #[test]
    fn test_release_records_failure_history() {
        let store = create_test_store();
        store.create(create_test_request("release")).unwrap();
        let claimed = store.claim("pool", 10, None).unwrap().unwrap();

        assert!(!store.release(claimed.id, "someone-else", Some("x")).unwrap());

        let long_error = "e".repeat(900);
        assert!(store.release(claimed.id, "pool", Some(&long_error)).unwrap());

        let ticket = store.get(claimed.id).unwrap().unwrap();
        assert!(ticket.is_claimable());
        let history = ticket.metadata["failure_history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["error"].as_str().unwrap().len(), 500);

        // Second release is a no-op.
        assert!(!store.release(claimed.id, "pool", None).unwrap());
    }

    #[test]
    fn test_hand_over_moves_reservation() {
        let store = create_test_store();
        store.create(create_test_request("handover")).unwrap();
        let claimed = store.claim("pool", 10, None).unwrap().unwrap();

        assert!(!store.hand_over(claimed.id, "not-pool", "child", 55).unwrap());
        assert!(store.hand_over(claimed.id, "pool", "child", 55).unwrap());

        let ticket = store.get(claimed.id).unwrap().unwrap();
        assert_eq!(ticket.assigned_to.as_deref(), Some("child"));
        assert_eq!(ticket.worker_pid, Some(55));
        assert_eq!(ticket.metadata["claimed_by"], "child");
    }

    #[test]
    fn test_cancel_clears_pid_and_blocks_updates() {
        let store = create_test_store();
        store.create(create_test_request("cancel")).unwrap();
        let claimed = store.claim("w1", 10, None).unwrap().unwrap();

        let cancelled = store.cancel(claimed.id, Some("operator stop")).unwrap();
        assert_eq!(cancelled.status, TicketStatus::Cancelled);
        assert_eq!(cancelled.worker_pid, None);
        assert_eq!(cancelled.assigned_to.as_deref(), Some("w1"));

        let err = store
            .set_status(claimed.id, "w1", TicketStatus::Resolved, None)
            .unwrap_err();
        assert!(matches!(err, TicketError::AlreadyTerminal { .. }));
        assert!(store.cancel(claimed.id, None).is_err());
    }

    #[test]
    fn test_reset_orphan_requires_matching_pid() {
        let store = create_test_store();
        store.create(create_test_request("orphan")).unwrap();
        let claimed = store.claim("w1", 321, None).unwrap().unwrap();

        let listed = store.list_claimed().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].worker_pid, 321);

        assert!(!store.reset_orphan(claimed.id, 999, "gone").unwrap());
        assert!(store
            .reset_orphan(claimed.id, 321, "worker process 321 no longer exists")
            .unwrap());

        let ticket = store.get(claimed.id).unwrap().unwrap();
        assert!(ticket.is_claimable());
        assert_eq!(
            ticket.metadata["failure_history"][0]["error"],
            "worker process 321 no longer exists"
        );
        assert!(!store.reset_orphan(claimed.id, 321, "gone").unwrap());
    }
}
