pub mod backoff;
pub mod clock;
pub mod config;
mod db;
pub mod lock;
pub mod metrics;
pub mod notify;
pub mod reconciler;
pub mod scaler;
pub mod testing;
pub mod ticket;
pub mod worker;

pub use backoff::{
    BackoffConfig, BackoffError, ConflictBackoff, HolderStatus, HolderStatusSource,
    HttpHolderStatus, RemoteLockClient, ResourceBusy, StoreHolderStatus,
};
pub use clock::{Clock, SystemClock};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    SanitizedConfig, ServerConfig,
};
pub use lock::{
    LockConfig, LockError, LockOutcome, LockStore, ResourceLockManager, ResourceLockSlot,
    SqliteLockStore,
};
pub use notify::{
    connect_notifier, EventKind, Notifier, NotifierConfig, NotifierMode, TicketEvent,
};
pub use reconciler::{OrphanReconciler, OsProcessLiveness, ProcessLiveness, ReconcilerConfig};
pub use scaler::{AgentProfile, ProcessLauncher, ScalerConfig, WorkerLauncher, WorkerPoolScaler};
pub use ticket::{
    CreateTicketRequest, Priority, SqliteTicketStore, Ticket, TicketError, TicketFilter,
    TicketId, TicketKind, TicketStatus, TicketStore,
};
pub use worker::{TicketCancellation, WorkerError, WorkerSession};
