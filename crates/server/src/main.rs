use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spawnpool_core::{
    connect_notifier, load_config, validate_config, OrphanReconciler, OsProcessLiveness,
    ProcessLauncher, ResourceLockManager, SqliteLockStore, SqliteTicketStore, StoreHolderStatus,
    TicketStore, WorkerPoolScaler,
};

use spawnpool_server::api::{create_router, forward_events, WsBroadcaster};
use spawnpool_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("SPAWNPOOL_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("SPAWNPOOL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "spawnpool {} starting (config {})",
        VERSION,
        &config_hash[..16]
    );
    info!("Database path: {:?}", config.database.path);

    let busy_timeout = Duration::from_millis(config.database.busy_timeout_ms);

    // Create SQLite stores
    let ticket_store: Arc<dyn TicketStore> = Arc::new(
        SqliteTicketStore::with_busy_timeout(&config.database.path, busy_timeout)
            .context("Failed to create ticket store")?,
    );
    let lock_store = Arc::new(
        SqliteLockStore::with_busy_timeout(&config.database.path, busy_timeout)
            .context("Failed to create lock store")?,
    );
    let locks = Arc::new(
        ResourceLockManager::new(lock_store.clone(), config.locks.clone())
            .context("Failed to create lock manager")?,
    );
    info!(
        "Stores initialized ({} lock resources)",
        config.locks.resources.len()
    );

    let holder_status = Arc::new(StoreHolderStatus::new(
        lock_store.clone(),
        Arc::clone(&ticket_store),
    ));

    // Event layer; falls back to polling without a reachable broker
    let notifier = connect_notifier(&config.notifier, Arc::clone(&ticket_store)).await;
    info!("Notifier mode: {:?}", notifier.mode());

    let ws_broadcaster = WsBroadcaster::default();
    let forwarders = forward_events(notifier.as_ref(), ws_broadcaster.clone()).await;

    // Orphan reconciler
    let reconciler = Arc::new(
        OrphanReconciler::new(
            config.reconciler.clone(),
            Arc::clone(&ticket_store),
            Arc::new(OsProcessLiveness),
        )
        .with_lock_store(lock_store.clone())
        .with_notifier(Arc::clone(&notifier)),
    );
    if config.reconciler.enabled {
        reconciler.start().await;
        info!("Orphan reconciler started");
    } else {
        info!("Orphan reconciler disabled in config");
    }

    // Worker pool scaler
    let scaler = if config.scaler.enabled && !config.scaler.agents.is_empty() {
        let scaler = Arc::new(WorkerPoolScaler::with_notifier(
            config.scaler.clone(),
            Arc::clone(&ticket_store),
            Arc::new(ProcessLauncher),
            Arc::clone(&notifier),
        ));
        scaler.start().await;
        info!("Worker pool scaler started");
        Some(scaler)
    } else {
        info!("Worker pool scaler disabled (no agents configured or disabled in config)");
        None
    };

    // Create app state
    let mut state = AppState::new(
        config.clone(),
        ticket_store,
        locks,
        holder_status,
        notifier,
        ws_broadcaster,
    )
    .with_reconciler(Arc::clone(&reconciler));
    if let Some(scaler) = &scaler {
        state = state.with_scaler(Arc::clone(scaler));
    }

    // Create router
    let app = create_router(Arc::new(state));

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    if let Some(scaler) = &scaler {
        info!("Stopping worker pool scaler...");
        scaler.stop().await;
    }
    if config.reconciler.enabled {
        info!("Stopping orphan reconciler...");
        reconciler.stop().await;
    }
    for task in forwarders {
        task.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
