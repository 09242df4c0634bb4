//! Reservation service.
//!
//! ```bash
//! REDIS_URL=redis://localhost:6379 \
//! CATALOG_BASE_URL=http://localhost:8000 \
//! cargo run -p stockhold-server
//! ```

use stockhold_server::{Config, run};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockhold=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        redis = %config.redis.redacted_url(),
        catalog = %config.catalog.base_url,
        hold_ttl_secs = config.holds.ttl_secs,
        "Configuration loaded"
    );

    run(config).await
}
