//! HTTP client for the server's lock API.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackoffError, ResourceBusy};

#[derive(Debug, Serialize)]
struct AcquireRequest<'a> {
    task_id: &'a str,
    pid: u32,
}

#[derive(Debug, Serialize)]
struct ReleaseRequest<'a> {
    task_id: &'a str,
}

/// Successful acquisition as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLockGrant {
    pub resource: String,
    /// "acquired" or "reclaimed".
    pub outcome: String,
    #[serde(default)]
    pub previous_holder: Option<String>,
}

/// Result of a remote acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAcquire {
    Granted(RemoteLockGrant),
    Busy(ResourceBusy),
}

/// Body of a 409 from the lock API.
#[derive(Debug, Deserialize)]
struct BusyBody {
    resource: String,
    holder_task_id: String,
}

/// Acquires and releases locks through a spawnpool server, for workers
/// that do not open the database themselves.
pub struct RemoteLockClient {
    client: Client,
    base_url: String,
}

impl RemoteLockClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackoffError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackoffError::Remote(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn lock_url(&self, resource: &str, action: &str) -> String {
        format!(
            "{}/api/v1/locks/{}/{}",
            self.base_url,
            urlencoding::encode(resource),
            action
        )
    }

    /// Try to acquire `resource`. A 409 comes back as [`RemoteAcquire::Busy`].
    pub async fn acquire(
        &self,
        resource: &str,
        task_id: &str,
        pid: u32,
    ) -> Result<RemoteAcquire, BackoffError> {
        let response = self
            .client
            .post(self.lock_url(resource, "acquire"))
            .json(&AcquireRequest { task_id, pid })
            .send()
            .await
            .map_err(|e| BackoffError::Remote(e.to_string()))?;

        match response.status() {
            StatusCode::CONFLICT => {
                let body: BusyBody = response
                    .json()
                    .await
                    .map_err(|e| BackoffError::Remote(format!("failed to parse response: {}", e)))?;
                debug!("{} busy, held by {}", body.resource, body.holder_task_id);
                Ok(RemoteAcquire::Busy(ResourceBusy::new(
                    body.resource,
                    body.holder_task_id,
                )))
            }
            status if status.is_success() => {
                let grant: RemoteLockGrant = response
                    .json()
                    .await
                    .map_err(|e| BackoffError::Remote(format!("failed to parse response: {}", e)))?;
                Ok(RemoteAcquire::Granted(grant))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BackoffError::Remote(format!(
                    "HTTP {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                )))
            }
        }
    }

    /// Release `resource`. Idempotent on the server.
    pub async fn release(&self, resource: &str, task_id: &str) -> Result<(), BackoffError> {
        let response = self
            .client
            .post(self.lock_url(resource, "release"))
            .json(&ReleaseRequest { task_id })
            .send()
            .await
            .map_err(|e| BackoffError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackoffError::Remote(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}
