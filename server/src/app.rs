//! Startup and shutdown.
//!
//! ```text
//! connect Redis (retry) → build catalog gateway → install metrics
//!   → spawn reconciler → serve HTTP
//!   → on Ctrl+C / SIGTERM: stop HTTP, signal reconciler, wait (bounded)
//! ```

use crate::config::Config;
use anyhow::Context;
use axum::{Router, routing::get};
use std::sync::Arc;
use stockhold_catalog::HttpCatalogGateway;
use stockhold_core::environment::SystemClock;
use stockhold_core::store::StockStore;
use stockhold_redis::{RedisExpirationFeed, RedisStockStore};
use stockhold_runtime::metrics::MetricsServer;
use stockhold_runtime::{ExpiryReconciler, ReservationCoordinator, retry_with_backoff};
use stockhold_web::{AppState, build_router};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Run the service until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if Redis stays unreachable after the configured
/// retries, the catalog URL is invalid, the metrics recorder cannot be
/// installed, or the listener cannot bind.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let client = redis::Client::open(config.redis.url.as_str())
        .with_context(|| format!("Invalid Redis URL {}", config.redis.redacted_url()))?;

    info!(redis = %config.redis.redacted_url(), "Connecting to Redis...");
    let store = retry_with_backoff("redis connect", config.connect_policy(), || {
        RedisStockStore::connect(client.clone())
    })
    .await
    .context("Failed to connect to Redis")?;
    let store: Arc<dyn StockStore> = Arc::new(store);
    info!("Redis connected");

    let catalog = HttpCatalogGateway::new(
        &config.catalog.base_url,
        &config.catalog.resource_path,
        config.catalog_timeout(),
    )
    .context("Failed to build catalog client")?;

    let mut metrics = MetricsServer::new();
    metrics.start().context("Failed to install metrics recorder")?;

    let coordinator = ReservationCoordinator::new(
        Arc::clone(&store),
        Arc::new(catalog),
        Arc::new(SystemClock),
        config.coordinator(),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = ExpiryReconciler::new(
        Arc::new(RedisExpirationFeed::new(client)),
        Arc::clone(&store),
        shutdown_rx,
    )
    .with_retry_policy(config.reconciler_policy())
    .with_claim_window(config.reconciler_claim_window())
    .spawn();

    let app = build_router(AppState::new(coordinator)).merge(metrics_router(&metrics));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        address = %addr,
        hold_ttl_secs = config.holds.ttl_secs,
        catalog = %config.catalog.base_url,
        "Reservation service listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("HTTP server stopped, stopping expiry reconciler");
    // No receiver means the reconciler already exited.
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(config.shutdown_timeout(), reconciler).await {
        Ok(Ok(())) => info!("Expiry reconciler stopped"),
        Ok(Err(e)) => warn!(error = %e, "Expiry reconciler task failed"),
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Expiry reconciler did not stop in time"
        ),
    }

    served.context("HTTP server failed")
}

/// `/metrics` route, if this process owns the recorder.
fn metrics_router(metrics: &MetricsServer) -> Router {
    match metrics.handle().cloned() {
        Some(handle) => Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        None => Router::new(),
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
