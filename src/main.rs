//! Cell Swap Engine - executes multi-hop, cross-chain swaps through Cell routers
//!
//! Serves the local API the UI reads through, sends swaps via the configured
//! wallet endpoint and tracks them across chains until they settle.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use cell_swap_engine::api::{self, AppState};
use cell_swap_engine::chain::{ChainRegistry, RpcTransport};
use cell_swap_engine::config::Settings;
use cell_swap_engine::metrics::{self, MetricsServer};
use cell_swap_engine::quote::{HttpQuoteSource, QuoteRefresher, QuoteSource};
use cell_swap_engine::state::{open_store, HistoryStore, PreferencesStore};
use cell_swap_engine::swap::{SwapExecutor, SwapSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Cell Swap Engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let registry = Arc::new(ChainRegistry::from_settings(&settings)?);
    info!("Loaded configuration for {} chains", registry.len());

    // Local persistence
    let store = open_store(&settings.storage).await?;
    let history =
        Arc::new(HistoryStore::load(store.clone(), settings.storage.history_retention).await?);
    let preferences = Arc::new(PreferencesStore::new(
        store.clone(),
        settings.preferences.clone(),
    ));
    info!("Storage ready at {}", settings.storage.url);

    // Chain access and wallet
    let transport = Arc::new(RpcTransport::new(&registry, &settings.wallet)?);
    let executor = SwapExecutor::new(
        transport.clone(),
        registry.clone(),
        history.clone(),
        settings.engine.clone(),
    );
    let session = Arc::new(SwapSession::new(Arc::new(executor)));

    let refresher = match HttpQuoteSource::from_config(&settings.quoting)? {
        Some(source) => {
            let source: Arc<dyn QuoteSource> = Arc::new(source);
            Some(Arc::new(QuoteRefresher::from_config(source, &settings.quoting)))
        }
        None => {
            warn!("No quoting service configured - quote refresh is disabled");
            None
        }
    };

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            session: session.clone(),
            history: history.clone(),
            preferences,
            registry: registry.clone(),
            store: store.clone(),
            refresher,
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Swap notification log
    let notification_handle = tokio::spawn({
        let mut notifications = session.subscribe();
        async move {
            loop {
                match notifications.recv().await {
                    Ok(n) => debug!(
                        "Swap {} is {}: {:?} on chain {}",
                        n.swap_id, n.state, n.event.status, n.event.chain_id
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Notification log skipped {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let transport = transport.clone();
        let store = store.clone();
        let interval = settings.engine.health_check_interval_secs;
        async move {
            loop {
                // Check chain connections
                for (chain_id, healthy) in transport.health_check().await {
                    metrics::record_chain_health(chain_id, healthy);
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                // Check storage
                if let Err(e) = store.health_check().await {
                    warn!("Storage health check failed: {}", e);
                }

                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
        }
    });

    info!("Cell Swap Engine is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Stop the running swap before tearing down
    if let Some(swap_id) = session.cancel().await {
        info!("Cancelled swap {} on shutdown", swap_id);
    }

    api_handle.abort();
    notification_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Cell Swap Engine stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,cell_swap_engine=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
