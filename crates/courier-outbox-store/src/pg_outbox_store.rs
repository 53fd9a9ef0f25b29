//! `PostgreSQL` implementation of the outbox store.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use courier_core::error::{DomainError, OutboxError};
use courier_core::outbox::{
    ClaimedBatch, NewOutboxRow, OutboxRow, OutboxStore, OutboxTransaction, TransactionalStore,
};

use crate::schema::{
    CLAIM_PENDING_ROWS, COUNT_PENDING, CREATE_OUTBOX_TABLE, INSERT_OUTBOX_ROW, MARK_FAILED,
    MARK_PROCESSED, SELECT_FAILED_ROWS,
};

fn storage_error(err: sqlx::Error) -> OutboxError {
    OutboxError::Storage(err.to_string())
}

fn infrastructure_error(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

/// Row shape of `outbox_messages`.
#[derive(Debug, sqlx::FromRow)]
struct OutboxRecord {
    id: Uuid,
    event_type: String,
    payload: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl From<OutboxRecord> for OutboxRow {
    fn from(record: OutboxRecord) -> Self {
        Self {
            id: record.id,
            event_type: record.event_type,
            payload: record.payload,
            created_at: record.created_at,
            processed_at: record.processed_at,
            failed_at: record.failed_at,
            last_error: record.last_error,
        }
    }
}

/// PostgreSQL-backed outbox store.
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Creates a new `PgOutboxStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the outbox table and index if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Storage` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), OutboxError> {
        sqlx::raw_sql(CREATE_OUTBOX_TABLE)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    /// Rows the bus permanently refused, oldest failure first.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Storage` if the query fails.
    pub async fn failed_rows(&self) -> Result<Vec<OutboxRow>, OutboxError> {
        let records = sqlx::query_as::<_, OutboxRecord>(SELECT_FAILED_ROWS)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(records.into_iter().map(OutboxRow::from).collect())
    }
}

/// An open business transaction that outbox rows are staged into.
pub struct PgOutboxTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgOutboxTransaction {
    /// Connection for business writes that must commit with the outbox rows.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }
}

#[async_trait]
impl TransactionalStore for PgOutboxStore {
    type Transaction = PgOutboxTransaction;

    async fn begin(&self) -> Result<PgOutboxTransaction, DomainError> {
        let tx = self.pool.begin().await.map_err(infrastructure_error)?;
        Ok(PgOutboxTransaction { tx })
    }
}

#[async_trait]
impl OutboxTransaction for PgOutboxTransaction {
    async fn insert_outbox_row(&mut self, row: &NewOutboxRow) -> Result<Uuid, OutboxError> {
        sqlx::query(INSERT_OUTBOX_ROW)
            .bind(row.id)
            .bind(&row.event_type)
            .bind(&row.payload)
            .bind(row.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        Ok(row.id)
    }

    async fn commit(self) -> Result<(), DomainError> {
        self.tx.commit().await.map_err(infrastructure_error)
    }

    async fn rollback(self) -> Result<(), DomainError> {
        self.tx.rollback().await.map_err(infrastructure_error)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    #[instrument(skip(self))]
    async fn claim_batch(&self, limit: usize) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let records = sqlx::query_as::<_, OutboxRecord>(CLAIM_PENDING_ROWS)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await
            .map_err(storage_error)?;

        let rows: Vec<OutboxRow> = records.into_iter().map(OutboxRow::from).collect();
        debug!(claimed = rows.len(), "claimed outbox rows");

        Ok(Box::new(PgClaimedBatch {
            claimed: rows.iter().map(|row| row.id).collect(),
            rows,
            tx,
        }))
    }

    async fn pending_count(&self) -> Result<u64, OutboxError> {
        let count = sqlx::query_scalar::<_, i64>(COUNT_PENDING)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// Rows locked by one claiming transaction.
///
/// The row locks live exactly as long as `tx`; dropping the batch rolls the
/// transaction back and unlocks them.
struct PgClaimedBatch {
    tx: Transaction<'static, Postgres>,
    rows: Vec<OutboxRow>,
    claimed: HashSet<Uuid>,
}

#[async_trait]
impl ClaimedBatch for PgClaimedBatch {
    fn rows(&self) -> &[OutboxRow] {
        &self.rows
    }

    async fn mark_processed(
        &mut self,
        id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        if !self.claimed.contains(&id) {
            return Err(OutboxError::RowNotClaimed(id));
        }
        sqlx::query(MARK_PROCESSED)
            .bind(id)
            .bind(processed_at)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn mark_failed(
        &mut self,
        id: Uuid,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        if !self.claimed.contains(&id) {
            return Err(OutboxError::RowNotClaimed(id));
        }
        sqlx::query(MARK_FAILED)
            .bind(id)
            .bind(failed_at)
            .bind(reason)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), OutboxError> {
        let batch = *self;
        batch.tx.commit().await.map_err(storage_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError> {
        let batch = *self;
        batch.tx.rollback().await.map_err(storage_error)
    }
}
