//! Store-polling notifier used when no broker is reachable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{EventKind, EventSubscription, Notifier, NotifierMode, NotifyError, TicketEvent};
use crate::metrics::EVENTS_PUBLISHED;
use crate::ticket::{Ticket, TicketFilter, TicketId, TicketOrder, TicketStore};

/// Most recently updated tickets considered per poll.
const POLL_WINDOW: i64 = 1000;

const SUBSCRIPTION_BUFFER: usize = 256;

/// What one poll saw.
struct Snapshot {
    seen: HashMap<TicketId, DateTime<Utc>>,
    /// Oldest `updated_at` in a full window. Tickets created before it
    /// existed already, even if they were outside the window.
    horizon: Option<DateTime<Utc>>,
}

/// Derives ticket events by diffing periodic store snapshots.
///
/// Publishing is a no-op: the store already holds the state subscribers
/// will observe. Lock releases are not visible to polling and are never
/// delivered in this mode.
pub struct PollingNotifier {
    store: Arc<dyn TicketStore>,
    interval: Duration,
}

impl PollingNotifier {
    pub fn new(store: Arc<dyn TicketStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    fn load(store: &dyn TicketStore) -> Result<Vec<Ticket>, NotifyError> {
        Ok(store.list(
            &TicketFilter::new()
                .with_order(TicketOrder::Updated)
                .with_limit(POLL_WINDOW),
        )?)
    }
}

fn snapshot(tickets: &[Ticket]) -> Snapshot {
    let full = tickets.len() as i64 >= POLL_WINDOW;
    Snapshot {
        seen: tickets.iter().map(|t| (t.id, t.updated_at)).collect(),
        horizon: if full {
            tickets.iter().map(|t| t.updated_at).min()
        } else {
            None
        },
    }
}

/// Events of `kind` implied by moving from `previous` to `current`.
fn diff(previous: &Snapshot, current: &[Ticket], kind: EventKind) -> Vec<TicketEvent> {
    current
        .iter()
        .filter_map(|ticket| {
            let is_new = match previous.seen.get(&ticket.id) {
                Some(_) => false,
                None => previous.horizon.map_or(true, |h| ticket.created_at >= h),
            };
            let changed = previous
                .seen
                .get(&ticket.id)
                .map_or(!is_new, |seen| *seen != ticket.updated_at);

            match kind {
                EventKind::TicketCreated if is_new => Some(TicketEvent::created(ticket)),
                EventKind::TicketUpdated if changed => Some(TicketEvent::status_changed(ticket)),
                _ => None,
            }
        })
        .collect()
}

#[async_trait]
impl Notifier for PollingNotifier {
    async fn publish(&self, event: TicketEvent) {
        EVENTS_PUBLISHED
            .with_label_values(&[event.kind().as_str(), "polling"])
            .inc();
        debug!("Polling mode, not broadcasting {}", event.kind());
    }

    async fn subscribe(&self, kind: EventKind) -> Result<EventSubscription, NotifyError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        if kind == EventKind::LockReleased {
            // Nothing to poll; the subscription stays open and silent.
            let task = tokio::spawn(async move {
                tx.closed().await;
            });
            return Ok(EventSubscription::new(rx, Some(task)));
        }

        let mut previous = snapshot(&Self::load(self.store.as_ref())?);
        let store = Arc::clone(&self.store);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            loop {
                sleep(interval).await;

                let current = match Self::load(store.as_ref()) {
                    Ok(tickets) => tickets,
                    Err(e) => {
                        warn!("Event poll error: {}", e);
                        continue;
                    }
                };

                for event in diff(&previous, &current, kind) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                previous = snapshot(&current);
            }
        });

        Ok(EventSubscription::new(rx, Some(task)))
    }

    fn mode(&self) -> NotifierMode {
        NotifierMode::Polling
    }
}
