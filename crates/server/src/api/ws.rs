//! WebSocket stream of ticket and lock events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use spawnpool_core::{EventKind, Notifier, TicketEvent};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// Fan-out hub for WebSocket clients using a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<TicketEvent>,
}

impl WsBroadcaster {
    /// Create a new broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: TicketEvent) {
        // No receivers just means no clients are connected
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.sender.subscribe()
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Feed every notifier event kind into the broadcaster.
///
/// Returns the forwarding tasks; each ends when its subscription closes.
pub async fn forward_events(
    notifier: &dyn Notifier,
    broadcaster: WsBroadcaster,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    for kind in EventKind::all() {
        let mut subscription = match notifier.subscribe(kind).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!("Not forwarding {} events: {}", kind, e);
                continue;
            }
        };

        let broadcaster = broadcaster.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                broadcaster.broadcast(event);
            }
            debug!("{} subscription closed", kind);
        }));
    }

    tasks
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.ws_broadcaster().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    WS_MESSAGES_SENT
                        .with_label_values(&[event.kind().as_str()])
                        .inc();

                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                debug!("WebSocket send failed, client disconnected");
                                break;
                            }
                        }
                        Err(e) => error!("Failed to serialize event: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged, skipped {} events", n);
                    WS_LAG_EVENTS.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Broadcast channel closed");
                    break;
                }
            }
        }
    });

    // Only close frames matter; pings are answered by axum
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use spawnpool_core::testing::RecordingNotifier;
    use spawnpool_core::TicketId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_forward_events_reaches_subscribers() {
        let notifier = RecordingNotifier::new();
        let broadcaster = WsBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        let tasks = forward_events(&notifier, broadcaster.clone()).await;
        assert_eq!(tasks.len(), 3);

        let event = TicketEvent::LockReleased {
            resource: "video".to_string(),
            holder_task_id: "task-1".to_string(),
        };
        notifier.publish(event.clone()).await;

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, event);

        notifier
            .publish(TicketEvent::StatusChanged {
                ticket_id: TicketId(3),
                status: spawnpool_core::TicketStatus::Open,
                assigned_to: None,
            })
            .await;
        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind(), EventKind::TicketUpdated);
    }

    #[test]
    fn test_broadcast_without_clients() {
        let broadcaster = WsBroadcaster::default();
        broadcaster.broadcast(TicketEvent::LockReleased {
            resource: "script".to_string(),
            holder_task_id: "t".to_string(),
        });
    }
}
