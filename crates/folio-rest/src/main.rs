use anyhow::Context;
use folio_core::FolioConfig;
use folio_metadata::{create_sqlite_pool, run_migrations, SqliteResourceRepository};
use folio_service::{logging, Config, VersionedStore};
use std::sync::Arc;
use std::time::Duration;

/// How often the persistent cache tier is swept for stale and over-budget entries.
const CACHE_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
        Config::default()
    });

    // Validate configuration
    config.validate()?;

    logging::init(&config.logging).context("failed to initialise logging")?;

    let store_config = FolioConfig::load().context("failed to load store configuration")?;

    tracing::info!("Connecting to database: {}", config.database.path);
    let pool = create_sqlite_pool(&config.database.path).await?;

    tracing::info!("Running database migrations...");
    run_migrations(&pool).await?;

    let repository = Arc::new(SqliteResourceRepository::new(pool));
    let store = Arc::new(VersionedStore::open(store_config, repository).await?);

    let reload = store.reload().await?;
    tracing::info!(
        namespaces = reload.namespaces.len(),
        persisted_items = reload.l2_items,
        "Cache state rebuilt from disk"
    );

    let maintenance = tokio::spawn(cache_maintenance(Arc::clone(&store)));

    let app = folio_rest::app(Arc::clone(&store), config.server.request_timeout());

    let addr = format!("{}:{}", config.server.host, config.server.rest_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("REST server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Periodic L2 age and size eviction.
async fn cache_maintenance(store: Arc<VersionedStore>) {
    let mut interval = tokio::time::interval(CACHE_MAINTENANCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        match store.prune_cache().await {
            Ok(report) => tracing::debug!(evicted = report.evicted(), "cache maintenance pass"),
            Err(e) => tracing::warn!("Cache maintenance failed: {}", e),
        }
    }
}

/// Wait for SIGTERM or SIGINT signal for graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
