//! Holder status sources.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackoffError, HolderStatus, HolderStatusSource};
use crate::lock::LockStore;
use crate::ticket::{TicketId, TicketStatus, TicketStore};

/// Body of `GET /api/v1/holders/{task_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderStatusResponse {
    pub task_id: String,
    pub status: HolderStatus,
}

/// Reads holder status straight from the shared database.
///
/// A task that still holds a lock is running. Otherwise, when the task id
/// names a ticket, the ticket's status decides; any other task is released.
pub struct StoreHolderStatus {
    lock_store: Arc<dyn LockStore>,
    ticket_store: Arc<dyn TicketStore>,
}

impl StoreHolderStatus {
    pub fn new(lock_store: Arc<dyn LockStore>, ticket_store: Arc<dyn TicketStore>) -> Self {
        Self {
            lock_store,
            ticket_store,
        }
    }

    /// Synchronous lookup, shared with the HTTP handler.
    pub fn lookup(&self, task_id: &str) -> Result<HolderStatus, BackoffError> {
        let holds_lock = self
            .lock_store
            .list()
            .map_err(|e| BackoffError::Status(e.to_string()))?
            .iter()
            .any(|slot| slot.holder_task_id.as_deref() == Some(task_id));
        if holds_lock {
            return Ok(HolderStatus::Running);
        }

        let Ok(ticket_id) = task_id.parse::<TicketId>() else {
            return Ok(HolderStatus::Released);
        };

        let ticket = self
            .ticket_store
            .get(ticket_id)
            .map_err(|e| BackoffError::Status(e.to_string()))?;

        Ok(match ticket.map(|t| t.status) {
            Some(TicketStatus::Resolved) | Some(TicketStatus::Closed) => HolderStatus::Completed,
            Some(TicketStatus::WontFix) | Some(TicketStatus::Invalid) => HolderStatus::Failed,
            Some(TicketStatus::Cancelled) => HolderStatus::Cancelled,
            Some(TicketStatus::Open) | Some(TicketStatus::InProgress) | None => {
                HolderStatus::Released
            }
        })
    }
}

#[async_trait]
impl HolderStatusSource for StoreHolderStatus {
    async fn holder_status(&self, task_id: &str) -> Result<HolderStatus, BackoffError> {
        self.lookup(task_id)
    }
}

/// Asks a spawnpool server for holder status.
pub struct HttpHolderStatus {
    client: Client,
    base_url: String,
}

impl HttpHolderStatus {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackoffError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackoffError::Status(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HolderStatusSource for HttpHolderStatus {
    async fn holder_status(&self, task_id: &str) -> Result<HolderStatus, BackoffError> {
        let url = format!(
            "{}/api/v1/holders/{}",
            self.base_url,
            urlencoding::encode(task_id)
        );
        debug!("Polling holder status at {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BackoffError::Status(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackoffError::Status(format!("HTTP {}", response.status())));
        }

        let body: HolderStatusResponse = response
            .json()
            .await
            .map_err(|e| BackoffError::Status(format!("failed to parse response: {}", e)))?;

        Ok(body.status)
    }
}
