//! Courier outbox poller entry point.

use std::sync::Arc;

use courier_core::clock::SystemClock;
use courier_outbox_store::PgOutboxStore;
use courier_poller::error::AppError;
use courier_poller::{LogPublisher, OutboxPoller, PollerConfig, PollerError};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Courier outbox poller");

    // Read configuration from environment.
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| AppError::Config("DATABASE_URL environment variable must be set".into()))?;
    let service_name =
        std::env::var("OUTBOX_SERVICE_NAME").unwrap_or_else(|_| "courier".to_string());
    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .map_err(|e| {
            AppError::Config(format!("DATABASE_MAX_CONNECTIONS must be a valid u32: {e}"))
        })?;
    let config = PollerConfig::from_env()?;

    // Create database connection pool.
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await?;

    let store = PgOutboxStore::new(pool);
    store.ensure_schema().await.map_err(PollerError::from)?;

    let poller = OutboxPoller::new(
        Arc::new(store),
        Arc::new(LogPublisher::new(service_name)),
        Arc::new(SystemClock),
        config,
    );

    // Stop polling on Ctrl-C; the cycle in flight finishes first.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        let _ = shutdown_tx.send(());
    });

    poller.run(shutdown_rx).await;

    Ok(())
}
