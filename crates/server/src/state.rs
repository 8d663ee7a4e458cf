use std::sync::Arc;

use tracing::debug;

use spawnpool_core::{
    Config, Notifier, NotifierMode, OrphanReconciler, ResourceLockManager, SanitizedConfig,
    StoreHolderStatus, TicketEvent, TicketStore, WorkerPoolScaler,
};

use crate::api::WsBroadcaster;

/// Shared application state
pub struct AppState {
    config: Config,
    ticket_store: Arc<dyn TicketStore>,
    locks: Arc<ResourceLockManager>,
    holder_status: Arc<StoreHolderStatus>,
    notifier: Arc<dyn Notifier>,
    reconciler: Option<Arc<OrphanReconciler>>,
    scaler: Option<Arc<WorkerPoolScaler>>,
    ws_broadcaster: WsBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
        ticket_store: Arc<dyn TicketStore>,
        locks: Arc<ResourceLockManager>,
        holder_status: Arc<StoreHolderStatus>,
        notifier: Arc<dyn Notifier>,
        ws_broadcaster: WsBroadcaster,
    ) -> Self {
        Self {
            config,
            ticket_store,
            locks,
            holder_status,
            notifier,
            reconciler: None,
            scaler: None,
            ws_broadcaster,
        }
    }

    pub fn with_reconciler(mut self, reconciler: Arc<OrphanReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn with_scaler(mut self, scaler: Arc<WorkerPoolScaler>) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn ticket_store(&self) -> &dyn TicketStore {
        self.ticket_store.as_ref()
    }

    pub fn locks(&self) -> &ResourceLockManager {
        self.locks.as_ref()
    }

    pub fn holder_status(&self) -> &StoreHolderStatus {
        self.holder_status.as_ref()
    }

    pub fn notifier_mode(&self) -> NotifierMode {
        self.notifier.mode()
    }

    pub fn reconciler(&self) -> Option<&Arc<OrphanReconciler>> {
        self.reconciler.as_ref()
    }

    pub fn scaler(&self) -> Option<&Arc<WorkerPoolScaler>> {
        self.scaler.as_ref()
    }

    pub fn ws_broadcaster(&self) -> &WsBroadcaster {
        &self.ws_broadcaster
    }

    /// Publish an event caused by an API call.
    pub async fn publish(&self, event: TicketEvent) {
        debug!("API event {}", event.kind());
        self.notifier.publish(event).await;
    }
}
