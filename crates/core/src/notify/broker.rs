//! Redis pub/sub notifier.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{EventKind, EventSubscription, Notifier, NotifierMode, NotifyError, TicketEvent};
use crate::metrics::EVENTS_PUBLISHED;

const SUBSCRIPTION_BUFFER: usize = 256;

/// Broker-backed notifier. Events are JSON on `<prefix>:<event kind>`.
pub struct RedisNotifier {
    client: redis::Client,
    conn: ConnectionManager,
    prefix: String,
}

impl RedisNotifier {
    /// Connect and verify the broker answers within `timeout`.
    pub async fn connect(
        url: &str,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = redis::Client::open(url)?;

        let mut conn = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| NotifyError::Unreachable(format!("no answer from {} within {:?}", url, timeout)))?
            .map_err(|e| NotifyError::Unreachable(e.to_string()))?;

        let _: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| NotifyError::Unreachable(format!("PING to {} timed out", url)))??;

        Ok(Self {
            client,
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn channel(&self, kind: EventKind) -> String {
        format!("{}:{}", self.prefix, kind.as_str())
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, event: TicketEvent) {
        let kind = event.kind();
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", kind, e);
                return;
            }
        };

        let mut conn = self.conn.clone();
        match conn
            .publish::<_, _, i64>(self.channel(kind), payload)
            .await
        {
            Ok(receivers) => {
                EVENTS_PUBLISHED
                    .with_label_values(&[kind.as_str(), "broker"])
                    .inc();
                debug!("Published {} to {} subscribers", kind, receivers);
            }
            Err(e) => warn!("Failed to publish {} event: {}", kind, e),
        }
    }

    async fn subscribe(&self, kind: EventKind) -> Result<EventSubscription, NotifyError> {
        let channel = self.channel(kind);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let task = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Unreadable message on {}: {}", channel, e);
                        continue;
                    }
                };

                match serde_json::from_str::<TicketEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Malformed event on {}: {}", channel, e),
                }
            }
            debug!("Subscription to {} ended", channel);
        });

        Ok(EventSubscription::new(rx, Some(task)))
    }

    fn mode(&self) -> NotifierMode {
        NotifierMode::Broker
    }
}
