//! Outbox rows and the storage contracts around them.
//!
//! Two seams live here. [`TransactionalStore`] / [`OutboxTransaction`] are
//! used on the write path: the unit of work stages rows inside the same
//! transaction as the business change. [`OutboxStore`] / [`ClaimedBatch`] are
//! used by pollers: a batch of pending rows is claimed exclusively, marked
//! row by row, and then committed or rolled back as a whole.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{DomainError, OutboxError};
use crate::event::WireEvent;

/// Default number of rows claimed per poll cycle.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// A persisted outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRow {
    /// Unique row identifier.
    pub id: Uuid,
    /// Wire event type name.
    pub event_type: String,
    /// Serialized wire payload, opaque to the store.
    pub payload: String,
    /// When the row was staged.
    pub created_at: DateTime<Utc>,
    /// When the row was published; `None` while pending.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the bus permanently refused the row; such a row is never
    /// claimed again.
    pub failed_at: Option<DateTime<Utc>>,
    /// Why the bus refused the row.
    pub last_error: Option<String>,
}

impl OutboxRow {
    /// Returns `true` while the row still awaits publication.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none() && self.failed_at.is_none()
    }

    /// Returns `true` if the row was parked after a permanent rejection.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }
}

/// A row about to be inserted by the unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxRow {
    /// Unique row identifier, time-ordered.
    pub id: Uuid,
    /// Wire event type name.
    pub event_type: String,
    /// Serialized wire payload.
    pub payload: String,
    /// Staging time.
    pub created_at: DateTime<Utc>,
}

impl NewOutboxRow {
    /// Builds a row from a wire event, serializing its payload.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Serialization` if the payload cannot be encoded.
    pub fn from_wire_event(wire: WireEvent, clock: &dyn Clock) -> Result<Self, OutboxError> {
        Ok(Self {
            id: Uuid::now_v7(),
            payload: serde_json::to_string(&wire.payload)?,
            event_type: wire.event_type,
            created_at: clock.now(),
        })
    }
}

/// Opens transactions that business writes and outbox inserts share.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// The transaction handle handed to the unit of work.
    type Transaction: OutboxTransaction;

    /// Begins a new transaction.
    async fn begin(&self) -> Result<Self::Transaction, DomainError>;
}

/// A pending transaction that can stage outbox rows.
///
/// Dropping a transaction without committing it must discard everything it
/// staged.
#[async_trait]
pub trait OutboxTransaction: Send + 'static {
    /// Inserts an outbox row as part of this transaction and returns its id.
    async fn insert_outbox_row(&mut self, row: &NewOutboxRow) -> Result<Uuid, OutboxError>;

    /// Makes every write of this transaction durable.
    async fn commit(self) -> Result<(), DomainError>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<(), DomainError>;
}

/// The poller-facing side of the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` pending rows, oldest first.
    ///
    /// Rows already claimed by a concurrent caller are skipped, never waited
    /// on, so two claimants never receive the same row.
    async fn claim_batch(&self, limit: usize) -> Result<Box<dyn ClaimedBatch>, OutboxError>;

    /// Number of rows still pending, for monitoring.
    async fn pending_count(&self) -> Result<u64, OutboxError>;
}

/// An exclusively claimed set of rows.
///
/// Marks become visible only on [`ClaimedBatch::commit`]. Rolling back, or
/// dropping the batch, returns every row to pending.
#[async_trait]
pub trait ClaimedBatch: Send {
    /// The claimed rows in claim order.
    fn rows(&self) -> &[OutboxRow];

    /// Marks one claimed row as processed.
    async fn mark_processed(
        &mut self,
        id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), OutboxError>;

    /// Parks one claimed row the bus will never accept.
    ///
    /// A failed row leaves the pending set, so it cannot hold back the rows
    /// created after it.
    async fn mark_failed(
        &mut self,
        id: Uuid,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<(), OutboxError>;

    /// Publishes the marks and releases the claim.
    async fn commit(self: Box<Self>) -> Result<(), OutboxError>;

    /// Discards the marks and releases the claim.
    async fn rollback(self: Box<Self>) -> Result<(), OutboxError>;
}
