//! In-memory notifier for testing.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::notify::{
    EventKind, EventSubscription, Notifier, NotifierMode, NotifyError, TicketEvent,
};

/// Records published events and delivers them to in-process subscribers.
pub struct RecordingNotifier {
    published: Mutex<Vec<TicketEvent>>,
    tx: broadcast::Sender<TicketEvent>,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            published: Mutex::new(Vec::new()),
            tx,
        }
    }

    pub fn published(&self) -> Vec<TicketEvent> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn published_of(&self, kind: EventKind) -> Vec<TicketEvent> {
        self.published()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, event: TicketEvent) {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        let _ = self.tx.send(event);
    }

    async fn subscribe(&self, kind: EventKind) -> Result<EventSubscription, NotifyError> {
        let mut rx = self.tx.subscribe();
        let (tx, out) = mpsc::channel(256);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.kind() == kind => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(EventSubscription::new(out, Some(task)))
    }

    fn mode(&self) -> NotifierMode {
        NotifierMode::Broker
    }
}
