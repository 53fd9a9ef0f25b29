//! Courier Poller: Error types.

use courier_core::error::OutboxError;
use thiserror::Error;

/// Errors that end a poll cycle early.
///
/// Publish failures are not among them: they are counted in the cycle's
/// report and the affected rows stay pending.
#[derive(Debug, Error)]
pub enum PollerError {
    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The outbox store failed; the cycle's claim has been released.
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),
}

/// Startup and runtime errors for the poller binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Poller setup failed.
    #[error(transparent)]
    Poller(#[from] PollerError),
}
