//! Optional change notifications.
//!
//! With a reachable Redis broker, events go over pub/sub. Otherwise
//! subscribers fall back to polling the ticket store.

mod broker;
mod config;
mod polling;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::ticket::TicketStore;

pub use broker::RedisNotifier;
pub use config::NotifierConfig;
pub use polling::PollingNotifier;
pub use types::{
    EventKind, EventSubscription, Notifier, NotifierMode, NotifyError, TicketEvent,
};

/// Connect to the configured broker, falling back to polling when it is
/// absent or unreachable.
pub async fn connect_notifier(
    config: &NotifierConfig,
    store: Arc<dyn TicketStore>,
) -> Arc<dyn Notifier> {
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    let Some(url) = config.redis_url.as_deref() else {
        info!(
            "No event broker configured, polling every {}ms",
            config.poll_interval_ms
        );
        return Arc::new(PollingNotifier::new(store, poll_interval));
    };

    let timeout = Duration::from_millis(config.connect_timeout_ms);
    match RedisNotifier::connect(url, &config.channel_prefix, timeout).await {
        Ok(notifier) => {
            info!("Connected to event broker");
            Arc::new(notifier)
        }
        Err(e) => {
            warn!(
                "Event broker unavailable ({}), polling every {}ms",
                e, config.poll_interval_ms
            );
            Arc::new(PollingNotifier::new(store, poll_interval))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::SqliteTicketStore;

    #[tokio::test]
    async fn test_no_broker_uses_polling() {
        let store = Arc::new(SqliteTicketStore::in_memory().unwrap());
        let notifier = connect_notifier(&NotifierConfig::default(), store).await;
        assert_eq!(notifier.mode(), NotifierMode::Polling);
    }

    #[tokio::test]
    async fn test_unreachable_broker_falls_back() {
        let store = Arc::new(SqliteTicketStore::in_memory().unwrap());
        let config = NotifierConfig {
            redis_url: Some("redis://127.0.0.1:1/".to_string()),
            connect_timeout_ms: 300,
            ..Default::default()
        };
        let notifier = connect_notifier(&config, store).await;
        assert_eq!(notifier.mode(), NotifierMode::Polling);
    }
}
