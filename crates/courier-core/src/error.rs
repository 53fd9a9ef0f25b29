//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// Staging outbox rows inside the business transaction failed.
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),
}

/// Errors raised by outbox storage.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The underlying store failed (connection, query, commit).
    #[error("outbox storage error: {0}")]
    Storage(String),

    /// A wire payload could not be serialized.
    #[error("outbox payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row was marked that is not part of the claimed batch.
    #[error("outbox row {0} is not part of this claim")]
    RowNotClaimed(Uuid),
}
