//! Processed-key stores: remember which event ids a consumer has handled.
//!
//! A key is claimed before the handler runs and completed after it
//! succeeds. Claiming is a single atomic step, so two concurrent deliveries
//! of one event can never both reach the handler.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ConsumeError;

/// How long an uncompleted claim blocks other deliveries before it is
/// presumed abandoned by a crashed consumer.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(300);

/// Result of trying to claim an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClaim {
    /// The caller now owns the key and must complete or release it.
    Acquired,
    /// Another delivery holds the key and has not finished.
    InFlight,
    /// The key was handled before.
    Completed,
}

/// Per-consumer record of handled idempotency keys.
#[async_trait]
pub trait ProcessedKeyStore: Send + Sync {
    /// Atomically claims `key` for `consumer` unless it is held or done.
    async fn try_claim(&self, consumer: &str, key: Uuid) -> Result<KeyClaim, ConsumeError>;

    /// Records a claimed key as handled.
    async fn complete(&self, consumer: &str, key: Uuid) -> Result<(), ConsumeError>;

    /// Drops an uncompleted claim so a redelivery can try again.
    async fn release(&self, consumer: &str, key: Uuid) -> Result<(), ConsumeError>;

    /// Returns `true` if `consumer` completed `key`.
    async fn is_processed(&self, consumer: &str, key: Uuid) -> Result<bool, ConsumeError>;
}

#[derive(Debug, Clone, Copy)]
enum KeyState {
    InFlight(Instant),
    Completed,
}

/// Processed-key store held in memory.
#[derive(Debug)]
pub struct InMemoryProcessedKeyStore {
    keys: Mutex<HashMap<(String, Uuid), KeyState>>,
    claim_ttl: Duration,
}

impl Default for InMemoryProcessedKeyStore {
    fn default() -> Self {
        Self {
            keys: Mutex::default(),
            claim_ttl: DEFAULT_CLAIM_TTL,
        }
    }
}

impl InMemoryProcessedKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_claim_ttl(mut self, claim_ttl: Duration) -> Self {
        self.claim_ttl = claim_ttl;
        self
    }
}

fn poisoned<T>(_: T) -> ConsumeError {
    ConsumeError::Storage("processed-key store mutex poisoned".into())
}

#[async_trait]
impl ProcessedKeyStore for InMemoryProcessedKeyStore {
    async fn try_claim(&self, consumer: &str, key: Uuid) -> Result<KeyClaim, ConsumeError> {
        let mut keys = self.keys.lock().map_err(poisoned)?;
        let now = Instant::now();
        match keys.get(&(consumer.to_owned(), key)) {
            Some(KeyState::Completed) => Ok(KeyClaim::Completed),
            Some(KeyState::InFlight(since)) if now.duration_since(*since) < self.claim_ttl => {
                Ok(KeyClaim::InFlight)
            }
            _ => {
                keys.insert((consumer.to_owned(), key), KeyState::InFlight(now));
                Ok(KeyClaim::Acquired)
            }
        }
    }

    async fn complete(&self, consumer: &str, key: Uuid) -> Result<(), ConsumeError> {
        let mut keys = self.keys.lock().map_err(poisoned)?;
        keys.insert((consumer.to_owned(), key), KeyState::Completed);
        Ok(())
    }

    async fn release(&self, consumer: &str, key: Uuid) -> Result<(), ConsumeError> {
        let mut keys = self.keys.lock().map_err(poisoned)?;
        let id = (consumer.to_owned(), key);
        if matches!(keys.get(&id), Some(KeyState::InFlight(_))) {
            keys.remove(&id);
        }
        Ok(())
    }

    async fn is_processed(&self, consumer: &str, key: Uuid) -> Result<bool, ConsumeError> {
        let keys = self.keys.lock().map_err(poisoned)?;
        Ok(matches!(
            keys.get(&(consumer.to_owned(), key)),
            Some(KeyState::Completed)
        ))
    }
}

/// PostgreSQL-backed processed-key store.
///
/// The claim is a row with a NULL `processed_at`. A stale claim older than
/// the claim TTL is taken over by the next delivery.
#[derive(Debug, Clone)]
pub struct PgProcessedKeyStore {
    pool: PgPool,
    claim_ttl: Duration,
}

impl PgProcessedKeyStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_ttl: DEFAULT_CLAIM_TTL,
        }
    }

    #[must_use]
    pub fn with_claim_ttl(mut self, claim_ttl: Duration) -> Self {
        self.claim_ttl = claim_ttl;
        self
    }
}

#[async_trait]
impl ProcessedKeyStore for PgProcessedKeyStore {
    async fn try_claim(&self, consumer: &str, key: Uuid) -> Result<KeyClaim, ConsumeError> {
        let acquired = sqlx::query(
            "INSERT INTO processed_messages (consumer, message_key, claimed_at) \
             VALUES ($1, $2, NOW()) \
             ON CONFLICT (consumer, message_key) DO UPDATE SET claimed_at = NOW() \
             WHERE processed_messages.processed_at IS NULL \
               AND processed_messages.claimed_at < NOW() - make_interval(secs => $3)",
        )
        .bind(consumer)
        .bind(key)
        .bind(self.claim_ttl.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;
        if acquired {
            return Ok(KeyClaim::Acquired);
        }

        if self.is_processed(consumer, key).await? {
            Ok(KeyClaim::Completed)
        } else {
            Ok(KeyClaim::InFlight)
        }
    }

    async fn complete(&self, consumer: &str, key: Uuid) -> Result<(), ConsumeError> {
        sqlx::query(
            "UPDATE processed_messages SET processed_at = NOW() \
             WHERE consumer = $1 AND message_key = $2",
        )
        .bind(consumer)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release(&self, consumer: &str, key: Uuid) -> Result<(), ConsumeError> {
        sqlx::query(
            "DELETE FROM processed_messages \
             WHERE consumer = $1 AND message_key = $2 AND processed_at IS NULL",
        )
        .bind(consumer)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_processed(&self, consumer: &str, key: Uuid) -> Result<bool, ConsumeError> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM processed_messages \
             WHERE consumer = $1 AND message_key = $2 AND processed_at IS NOT NULL)",
        )
        .bind(consumer)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }
}
