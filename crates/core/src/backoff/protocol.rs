//! Wait for a conflicting holder, then retry once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{BackoffConfig, BackoffError, CancellationCheck, HolderStatusSource, ResourceBusy};
use crate::metrics::{CONFLICT_WAITS, CONFLICT_WAIT_DURATION};

/// Cooperative waiting on a resource held by another task.
///
/// The holder is polled until it reaches a terminal status, the wait budget
/// is spent, or the waiting task is cancelled. The operation is retried at
/// most once; a second conflict is the caller's to handle.
pub struct ConflictBackoff {
    config: BackoffConfig,
    status_source: Arc<dyn HolderStatusSource>,
}

impl ConflictBackoff {
    pub fn new(config: BackoffConfig, status_source: Arc<dyn HolderStatusSource>) -> Self {
        Self {
            config,
            status_source,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub async fn wait_then_retry<F, Fut, T, E>(
        &self,
        busy: ResourceBusy,
        cancel: &dyn CancellationCheck,
        op: F,
    ) -> Result<T, BackoffError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_wait = Duration::from_millis(self.config.max_wait_ms);
        let started = Instant::now();

        info!(
            "{}, waiting up to {:?} for it to finish",
            busy, max_wait
        );

        loop {
            if cancel.is_cancelled() {
                Self::observe("cancelled", started);
                info!("Cancelled while waiting for {}", busy.resource);
                return Err(BackoffError::Cancelled {
                    resource: busy.resource,
                });
            }

            match self.status_source.holder_status(&busy.holder_task_id).await {
                Ok(status) if status.is_terminal() => {
                    Self::observe("retried", started);
                    info!(
                        "Holder {} of {} is {}, retrying",
                        busy.holder_task_id, busy.resource, status
                    );
                    return op().await.map_err(|e| BackoffError::Operation(e.into()));
                }
                Ok(status) => debug!("Holder {} is {}", busy.holder_task_id, status),
                Err(e) => warn!(
                    "Status poll for holder {} failed: {}",
                    busy.holder_task_id, e
                ),
            }

            let waited = started.elapsed();
            if waited >= max_wait {
                Self::observe("timeout", started);
                warn!(
                    "Gave up on {} after {:?}, still held by {}",
                    busy.resource, waited, busy.holder_task_id
                );
                return Err(BackoffError::ConflictTimeout {
                    resource: busy.resource,
                    holder_task_id: busy.holder_task_id,
                    waited,
                });
            }

            sleep(poll_interval.min(max_wait - waited)).await;
        }
    }

    fn observe(outcome: &str, started: Instant) {
        CONFLICT_WAITS.with_label_values(&[outcome]).inc();
        CONFLICT_WAIT_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{HolderStatus, NeverCancelled};
    use crate::testing::ScriptedHolderStatus;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn backoff(source: Arc<ScriptedHolderStatus>, max_wait_ms: u64) -> ConflictBackoff {
        ConflictBackoff::new(
            BackoffConfig {
                poll_interval_ms: 10,
                max_wait_ms,
                http_timeout_secs: 1,
            },
            source,
        )
    }

    fn busy() -> ResourceBusy {
        ResourceBusy::new("video", "render-7")
    }

    #[tokio::test]
    async fn test_retries_once_after_holder_completes() {
        let source = Arc::new(ScriptedHolderStatus::new(vec![
            HolderStatus::Running,
            HolderStatus::Running,
            HolderStatus::Completed,
        ]));
        let backoff = backoff(source.clone(), 5_000);
        let attempts = AtomicUsize::new(0);

        let result = backoff
            .wait_then_retry(busy(), &NeverCancelled, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>("rendered")
            })
            .await
            .unwrap();

        assert_eq!(result, "rendered");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_times_out_while_holder_runs() {
        let source = Arc::new(ScriptedHolderStatus::always(HolderStatus::Running));
        let backoff = backoff(source, 50);

        let err = backoff
            .wait_then_retry(busy(), &NeverCancelled, || async {
                Ok::<_, std::io::Error>(())
            })
            .await
            .unwrap_err();

        match &err {
            BackoffError::ConflictTimeout {
                resource,
                holder_task_id,
                waited,
            } => {
                assert_eq!(resource, "video");
                assert_eq!(holder_task_id, "render-7");
                assert!(*waited >= Duration::from_millis(50));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let source = Arc::new(ScriptedHolderStatus::always(HolderStatus::Running));
        let backoff = backoff(source.clone(), 5_000);
        let cancel = AtomicBool::new(true);

        let err = backoff
            .wait_then_retry(busy(), &cancel, || async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, BackoffError::Cancelled { .. }));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_status_errors_keep_waiting() {
        let source = Arc::new(ScriptedHolderStatus::with_failures(
            2,
            vec![HolderStatus::Released],
        ));
        let backoff = backoff(source.clone(), 5_000);

        backoff
            .wait_then_retry(busy(), &NeverCancelled, || async {
                Ok::<_, std::io::Error>(())
            })
            .await
            .unwrap();
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_retry_is_operation_error() {
        let source = Arc::new(ScriptedHolderStatus::always(HolderStatus::Failed));
        let backoff = backoff(source, 5_000);

        let err = backoff
            .wait_then_retry(busy(), &NeverCancelled, || async {
                Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BackoffError::Operation(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
