// Main entry point for the session sync server

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::kernel::{PgSessionStore, ServerDeps, StreamHub};
use server_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        port = config.port,
        max_retries = config.tx_max_retries,
        base_delay_ms = config.tx_retry_base_delay.as_millis() as u64,
        "session sync server starting"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("database ready, migrations applied");

    // Build application
    let deps = ServerDeps::new(
        Arc::new(PgSessionStore::new(pool)),
        config.retry_policy(),
        StreamHub::with_capacity(config.update_channel_capacity),
    );
    let hub = deps.stream_hub.clone();
    let app = build_app(deps);

    // Drop idle SSE topics
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            hub.cleanup().await;
        }
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
