//! Dead-letter storage for messages that can never be consumed.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ConsumeError;

/// A message set aside instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DeadLetter {
    pub id: Uuid,
    /// Event type, if the envelope was readable far enough to have one.
    pub event_type: Option<String>,
    /// The message exactly as received.
    pub envelope: Vec<u8>,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Keeps dead letters for later inspection or replay.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Stores one dead letter.
    async fn record(&self, letter: DeadLetter) -> Result<(), ConsumeError>;

    /// All dead letters, oldest first.
    async fn list(&self) -> Result<Vec<DeadLetter>, ConsumeError>;
}

/// Dead-letter store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> ConsumeError {
    ConsumeError::Storage("dead-letter store mutex poisoned".into())
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn record(&self, letter: DeadLetter) -> Result<(), ConsumeError> {
        self.letters.lock().map_err(poisoned)?.push(letter);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadLetter>, ConsumeError> {
        Ok(self.letters.lock().map_err(poisoned)?.clone())
    }
}

/// PostgreSQL-backed dead-letter store.
#[derive(Debug, Clone)]
pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterStore for PgDeadLetterStore {
    async fn record(&self, letter: DeadLetter) -> Result<(), ConsumeError> {
        sqlx::query(
            "INSERT INTO dead_letters (id, event_type, envelope, reason, dead_lettered_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(letter.id)
        .bind(letter.event_type)
        .bind(letter.envelope)
        .bind(letter.reason)
        .bind(letter.dead_lettered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadLetter>, ConsumeError> {
        let letters = sqlx::query_as::<_, DeadLetter>(
            "SELECT id, event_type, envelope, reason, dead_lettered_at \
             FROM dead_letters ORDER BY dead_lettered_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(letters)
    }
}
