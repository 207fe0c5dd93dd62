//! Entitlement synchronizer daemon.
//!
//! Wires the HTTP collaborators into the orchestrator, runs the startup and
//! daily resyncs and serves the trigger, status and lookup endpoints.

mod config;
mod error;
mod handlers;
mod logging;
mod router;
mod scheduler;
mod state;

use config::Config;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use entitle_client::EntitlementClient;
use entitle_registry::{BusDirectory, BusRegistry, HttpBus, HttpGraphStore};
use entitle_sync::{
    Collaborators, EntitlementStore, Orchestrator, PgBackend, TriggerPolicy,
};

#[tokio::main]
async fn main() {
    // Load configuration (fail-fast on missing required values)
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        sync_time = %config.sync_time(),
        startup_delay_secs = config.schedule.startup_delay_secs,
        "Starting entitlement synchronizer"
    );

    let collaborators = match build_collaborators(&config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to build HTTP clients: {e}");
            std::process::exit(1);
        }
    };

    let store = match &config.database_url {
        Some(url) => {
            let pool = match PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => pool,
                Err(e) => {
                    tracing::error!("Failed to connect to database: {e}");
                    std::process::exit(1);
                }
            };
            let backend = PgBackend::new(pool);
            if let Err(e) = backend.ensure_schema().await {
                tracing::error!("Failed to prepare entitlement table: {e}");
                std::process::exit(1);
            }
            EntitlementStore::new(Arc::new(backend))
        }
        None => EntitlementStore::local(),
    };
    info!(backend = store.backend_name(), "Entitlement store ready");

    let orchestrator = Arc::new(Orchestrator::new(
        collaborators,
        store,
        config.sync.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = scheduler::spawn_scheduler(
        Arc::clone(&orchestrator),
        config.schedule.clone(),
        shutdown_rx,
    );

    let state = AppState::new(orchestrator, TriggerPolicy::new(config.trigger.clone()));
    let app = router::router(state);

    // Bind and serve
    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {e}", config.bind_addr());
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!(%addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::warn!("Scheduler task ended abnormally: {e}");
    }
    info!("Server shutdown complete");
}

fn build_collaborators(config: &Config) -> Result<Collaborators, String> {
    let bus = HttpBus::new(config.bus.clone()).map_err(|e| e.to_string())?;
    let fetcher = EntitlementClient::new(config.client.clone()).map_err(|e| e.to_string())?;
    let graph = HttpGraphStore::new(config.graph.clone()).map_err(|e| e.to_string())?;

    Ok(Collaborators {
        directory: Arc::new(BusDirectory::new(bus.clone())),
        fetcher: Arc::new(fetcher),
        registry: Arc::new(BusRegistry::new(bus)),
        graph: Arc::new(graph),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
