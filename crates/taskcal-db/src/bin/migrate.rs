//! Deploy-time schema migration.
//!
//! Applies every pending migration once and exits. Request-serving code never
//! alters the schema.

use std::time::Instant;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskcal_db::{log_pool_metrics, Database, PoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT   - "json" or "text" (default: "text")
    //   RUST_LOG     - standard env filter (default: "taskcal_db=info")
    //   DATABASE_URL - required
    //   DB_*         - pool settings, see PoolConfig::from_env
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "taskcal_db=info,taskcal_migrate=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let config = PoolConfig::from_env().context("invalid pool configuration")?;

    let db = Database::connect_with_config(&database_url, config)
        .await
        .context("failed to connect to the database")?;
    log_pool_metrics(db.pool());

    let start = Instant::now();
    db.migrate().await.context("migration failed")?;

    info!(
        subsystem = "migrate",
        duration_ms = start.elapsed().as_millis() as u64,
        "Migrations applied"
    );
    Ok(())
}
