//! In-process helper for worker programs.
//!
//! A worker claims one ticket, runs its stages under resource locks,
//! checks for cancellation between stages and reports a final status.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::backoff::{BackoffError, CancellationCheck, ConflictBackoff};
use crate::lock::{LockError, ResourceLockManager};
use crate::scaler::WORKER_ID_ENV;
use crate::ticket::{
    Ticket, TicketError, TicketFilter, TicketId, TicketKind, TicketStatus, TicketStore,
};

/// Errors surfaced to worker code.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no ticket claimed")]
    NoTicket,

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

/// Cancellation signalled by the ticket's status.
pub struct TicketCancellation {
    store: Arc<dyn TicketStore>,
    ticket_id: TicketId,
}

impl TicketCancellation {
    pub fn new(store: Arc<dyn TicketStore>, ticket_id: TicketId) -> Self {
        Self { store, ticket_id }
    }
}

impl CancellationCheck for TicketCancellation {
    fn is_cancelled(&self) -> bool {
        // A store error is not a cancellation; the next check will retry.
        matches!(
            self.store.get(self.ticket_id),
            Ok(Some(ticket)) if ticket.status == TicketStatus::Cancelled
        )
    }
}

/// One worker's view of the coordination layer.
pub struct WorkerSession {
    worker_id: String,
    pid: u32,
    ticket_store: Arc<dyn TicketStore>,
    locks: Arc<ResourceLockManager>,
    backoff: Option<ConflictBackoff>,
    current: Option<TicketId>,
}

impl WorkerSession {
    pub fn new(
        worker_id: impl Into<String>,
        ticket_store: Arc<dyn TicketStore>,
        locks: Arc<ResourceLockManager>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            pid: std::process::id(),
            ticket_store,
            locks,
            backoff: None,
            current: None,
        }
    }

    /// Session for a process started by the scaler, identified through
    /// `SPAWNPOOL_WORKER_ID`.
    pub fn from_env(ticket_store: Arc<dyn TicketStore>, locks: Arc<ResourceLockManager>) -> Self {
        let worker_id = resolve_worker_id(std::env::var(WORKER_ID_ENV).ok(), std::process::id());
        Self::new(worker_id, ticket_store, locks)
    }

    /// Wait out busy resources instead of failing the stage.
    pub fn with_backoff(mut self, backoff: ConflictBackoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Claim with a different pid than this process (tests, proxies).
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn current_ticket(&self) -> Option<TicketId> {
        self.current
    }

    /// Take the next ticket. A ticket already handed to this worker by the
    /// scaler is resumed first.
    pub fn claim_next(&mut self, kind: Option<TicketKind>) -> Result<Option<Ticket>, WorkerError> {
        let handed = self.ticket_store.list(
            &TicketFilter::new()
                .with_status(TicketStatus::InProgress)
                .with_assigned_to(self.worker_id.clone())
                .with_limit(1),
        )?;
        if let Some(ticket) = handed.into_iter().next() {
            debug!("{} resuming {}", self.worker_id, ticket.id);
            self.current = Some(ticket.id);
            return Ok(Some(ticket));
        }

        let claimed = self.ticket_store.claim(&self.worker_id, self.pid, kind)?;
        if let Some(ticket) = &claimed {
            info!("{} claimed {}", self.worker_id, ticket.id);
        }
        self.current = claimed.as_ref().map(|t| t.id);
        Ok(claimed)
    }

    /// Whether an operator cancelled the current ticket.
    pub fn is_cancelled(&self) -> Result<bool, WorkerError> {
        let id = self.current.ok_or(WorkerError::NoTicket)?;
        let ticket = self
            .ticket_store
            .get(id)?
            .ok_or(TicketError::NotFound(id))?;
        Ok(ticket.status == TicketStatus::Cancelled)
    }

    /// Run one stage while holding `resource`.
    ///
    /// With backoff configured, a busy resource is waited on and the stage
    /// retried once; otherwise it is reported as [`LockError::Busy`].
    pub async fn run_stage<F, Fut, T>(
        &self,
        resource: &str,
        task_id: &str,
        stage: F,
    ) -> Result<T, WorkerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T>,
    {
        let busy = match self.locks.with_lock(resource, task_id, stage()).await {
            Ok(output) => return Ok(output),
            Err(LockError::Busy(busy)) => busy,
            Err(e) => return Err(e.into()),
        };

        let Some(backoff) = &self.backoff else {
            return Err(LockError::Busy(busy).into());
        };

        let cancel: Box<dyn CancellationCheck> = match self.current {
            Some(id) => Box::new(TicketCancellation::new(Arc::clone(&self.ticket_store), id)),
            None => Box::new(crate::backoff::NeverCancelled),
        };

        let output = backoff
            .wait_then_retry(busy.into(), cancel.as_ref(), || {
                self.locks.with_lock(resource, task_id, stage())
            })
            .await?;
        Ok(output)
    }

    /// Report the final status of the current ticket.
    pub fn complete(
        &mut self,
        status: TicketStatus,
        note: Option<&str>,
    ) -> Result<Ticket, WorkerError> {
        let id = self.current.ok_or(WorkerError::NoTicket)?;
        let ticket = self
            .ticket_store
            .set_status(id, &self.worker_id, status, note)?;
        info!("{} finished {} as {}", self.worker_id, id, status);
        self.current = None;
        Ok(ticket)
    }

    /// Give the current ticket back to the queue after a failure.
    pub fn abandon(&mut self, error: &str) -> Result<bool, WorkerError> {
        let id = self.current.ok_or(WorkerError::NoTicket)?;
        let released = self
            .ticket_store
            .release(id, &self.worker_id, Some(error))?;
        self.current = None;
        Ok(released)
    }
}

fn resolve_worker_id(from_env: Option<String>, pid: u32) -> String {
    from_env
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("worker-{}", pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{BackoffConfig, HolderStatus};
    use crate::lock::{LockConfig, SqliteLockStore};
    use crate::testing::ScriptedHolderStatus;
    use crate::ticket::{CreateTicketRequest, SqliteTicketStore};

    fn setup() -> (Arc<SqliteTicketStore>, Arc<ResourceLockManager>) {
        let tickets = Arc::new(SqliteTicketStore::in_memory().unwrap());
        let locks = Arc::new(
            ResourceLockManager::new(
                Arc::new(SqliteLockStore::in_memory().unwrap()),
                LockConfig::default(),
            )
            .unwrap(),
        );
        (tickets, locks)
    }

    #[test]
    fn test_resolve_worker_id() {
        assert_eq!(resolve_worker_id(Some("pool-a-1".into()), 9), "pool-a-1");
        assert_eq!(resolve_worker_id(Some("  ".into()), 9), "worker-9");
        assert_eq!(resolve_worker_id(None, 9), "worker-9");
    }

    #[tokio::test]
    async fn test_claim_run_complete() {
        let (tickets, locks) = setup();
        tickets
            .create(CreateTicketRequest::new(TicketKind::Defect, "crash", "details"))
            .unwrap();

        let mut session = WorkerSession::new("w1", tickets.clone(), locks.clone());
        let ticket = session.claim_next(None).unwrap().unwrap();
        assert!(!session.is_cancelled().unwrap());

        let output = session
            .run_stage("script", "w1-script", || async { 42 })
            .await
            .unwrap();
        assert_eq!(output, 42);
        assert!(!locks.slot("script").unwrap().is_held());

        let done = session.complete(TicketStatus::Resolved, Some("patched")).unwrap();
        assert_eq!(done.id, ticket.id);
        assert_eq!(done.status, TicketStatus::Resolved);
        assert!(session.current_ticket().is_none());
    }

    #[tokio::test]
    async fn test_resumes_handed_over_ticket() {
        let (tickets, locks) = setup();
        let created = tickets
            .create(CreateTicketRequest::new(TicketKind::Defect, "crash", ""))
            .unwrap();
        tickets.claim("pool", 1, None).unwrap().unwrap();
        assert!(tickets.hand_over(created.id, "pool", "pool-fixer-1", 77).unwrap());

        let mut session = WorkerSession::new("pool-fixer-1", tickets, locks);
        let ticket = session.claim_next(None).unwrap().unwrap();
        assert_eq!(ticket.id, created.id);
    }

    #[tokio::test]
    async fn test_cancellation_is_observed() {
        let (tickets, locks) = setup();
        tickets
            .create(CreateTicketRequest::new(TicketKind::Defect, "crash", ""))
            .unwrap();
        let mut session = WorkerSession::new("w1", tickets.clone(), locks);
        let ticket = session.claim_next(None).unwrap().unwrap();

        tickets.cancel(ticket.id, Some("operator stop")).unwrap();
        assert!(session.is_cancelled().unwrap());

        let cancel = TicketCancellation::new(tickets, ticket.id);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_busy_stage_without_backoff() {
        let (tickets, locks) = setup();
        locks.acquire("video", "other-task").unwrap();

        let session = WorkerSession::new("w1", tickets, locks);
        let err = tokio_test::block_on(session.run_stage("video", "w1-video", || async {}))
            .unwrap_err();
        assert!(matches!(err, WorkerError::Lock(LockError::Busy(_))));
    }

    #[tokio::test]
    async fn test_busy_stage_waits_and_retries() {
        let (tickets, locks) = setup();
        locks.acquire("video", "other-task").unwrap();

        // The holder finishes between the first and second poll.
        let releaser = Arc::clone(&locks);
        let source = Arc::new(ScriptedHolderStatus::new(vec![
            HolderStatus::Running,
            HolderStatus::Released,
        ]));
        source.on_call(1, move || {
            releaser.release("video", "other-task").unwrap();
        });

        let backoff = ConflictBackoff::new(
            BackoffConfig {
                poll_interval_ms: 10,
                max_wait_ms: 5_000,
                http_timeout_secs: 1,
            },
            source,
        );
        let session = WorkerSession::new("w1", tickets, locks.clone()).with_backoff(backoff);

        let output = session
            .run_stage("video", "w1-video", || async { "encoded" })
            .await
            .unwrap();
        assert_eq!(output, "encoded");
        assert!(!locks.slot("video").unwrap().is_held());
    }

    #[test]
    fn test_complete_without_ticket() {
        let (tickets, locks) = setup();
        let mut session = WorkerSession::new("w1", tickets, locks);
        assert!(matches!(
            session.complete(TicketStatus::Resolved, None),
            Err(WorkerError::NoTicket)
        ));
    }
}
