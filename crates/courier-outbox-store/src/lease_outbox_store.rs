//! In-memory outbox store with lease-based claims.
//!
//! Storage engines without a skip-locked read can still hand out disjoint
//! batches: every row carries `claimed_by` and `claim_expires_at`, and a
//! claim only takes rows that are unclaimed or whose lease has run out. A
//! claimant that dies without committing or rolling back therefore blocks
//! its rows for at most one lease.
//!
//! The store also keeps a small document table so business writes can share
//! a transaction with the outbox rows they produce. Transactions are
//! optimistic: every document and collection a transaction reads is
//! revalidated under the store lock at commit, and a transaction whose reads
//! went stale commits nothing, outbox rows included.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use courier_core::clock::Clock;
use courier_core::error::{DomainError, OutboxError};
use courier_core::outbox::{
    ClaimedBatch, NewOutboxRow, OutboxRow, OutboxStore, OutboxTransaction, TransactionalStore,
};

/// Default time a claim stays exclusive, in seconds.
pub const DEFAULT_LEASE_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct LeasedRow {
    row: OutboxRow,
    seq: u64,
    claimed_by: Option<Uuid>,
    claim_expires_at: Option<DateTime<Utc>>,
}

impl LeasedRow {
    fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.row.is_pending()
            && match self.claim_expires_at {
                None => true,
                Some(expires_at) => expires_at <= now,
            }
    }

    fn release(&mut self) {
        self.claimed_by = None;
        self.claim_expires_at = None;
    }
}

type DocumentKey = (String, Uuid);

/// A document slot. Deleting keeps the slot with `value: None` so its
/// revision keeps counting up.
#[derive(Debug, Clone)]
struct StoredDocument {
    value: Option<serde_json::Value>,
    revision: i64,
}

#[derive(Debug, Default)]
struct LeaseState {
    rows: Vec<LeasedRow>,
    documents: HashMap<DocumentKey, StoredDocument>,
    collection_revisions: HashMap<String, i64>,
    next_seq: u64,
}

impl LeaseState {
    fn append(&mut self, row: NewOutboxRow) {
        self.next_seq += 1;
        self.rows.push(LeasedRow {
            row: OutboxRow {
                id: row.id,
                event_type: row.event_type,
                payload: row.payload,
                created_at: row.created_at,
                processed_at: None,
                failed_at: None,
                last_error: None,
            },
            seq: self.next_seq,
            claimed_by: None,
            claim_expires_at: None,
        });
    }

    fn release_claim(&mut self, claim_id: Uuid) {
        for leased in &mut self.rows {
            if leased.claimed_by == Some(claim_id) {
                leased.release();
            }
        }
    }

    fn document(&self, key: &DocumentKey) -> Option<&serde_json::Value> {
        self.documents.get(key).and_then(|doc| doc.value.as_ref())
    }

    fn document_revision(&self, key: &DocumentKey) -> i64 {
        self.documents.get(key).map_or(0, |doc| doc.revision)
    }

    fn collection_revision(&self, collection: &str) -> i64 {
        self.collection_revisions
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    fn write_document(&mut self, key: DocumentKey, value: Option<serde_json::Value>) {
        *self
            .collection_revisions
            .entry(key.0.clone())
            .or_insert(0) += 1;
        let slot = self.documents.entry(key).or_insert(StoredDocument {
            value: None,
            revision: 0,
        });
        slot.value = value;
        slot.revision += 1;
    }
}

fn lock(state: &Mutex<LeaseState>) -> Result<MutexGuard<'_, LeaseState>, OutboxError> {
    state
        .lock()
        .map_err(|_| OutboxError::Storage("lease store mutex poisoned".into()))
}

/// In-memory transactional outbox store.
#[derive(Clone)]
pub struct LeaseOutboxStore {
    state: Arc<Mutex<LeaseState>>,
    clock: Arc<dyn Clock>,
    lease: TimeDelta,
}

impl std::fmt::Debug for LeaseOutboxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseOutboxStore")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl LeaseOutboxStore {
    /// Creates an empty store using `clock` for lease arithmetic.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LeaseState::default())),
            clock,
            lease: TimeDelta::seconds(DEFAULT_LEASE_SECS),
        }
    }

    /// Sets how long a claim stays exclusive.
    #[must_use]
    pub fn with_lease(mut self, lease: TimeDelta) -> Self {
        self.lease = lease;
        self
    }

    /// Inserts and commits a single row outside any business transaction.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Storage` if the store is poisoned.
    pub fn insert(&self, event_type: &str, payload: &str) -> Result<Uuid, OutboxError> {
        let row = NewOutboxRow {
            id: Uuid::now_v7(),
            event_type: event_type.to_owned(),
            payload: payload.to_owned(),
            created_at: self.clock.now(),
        };
        let id = row.id;
        lock(&self.state)?.append(row);
        Ok(id)
    }

    /// Every committed row in creation order.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Storage` if the store is poisoned.
    pub fn rows(&self) -> Result<Vec<OutboxRow>, OutboxError> {
        let state = lock(&self.state)?;
        let mut rows: Vec<&LeasedRow> = state.rows.iter().collect();
        rows.sort_by_key(|leased| (leased.row.created_at, leased.seq));
        Ok(rows.into_iter().map(|leased| leased.row.clone()).collect())
    }

    /// Rows the bus permanently refused, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Storage` if the store is poisoned.
    pub fn failed_rows(&self) -> Result<Vec<OutboxRow>, OutboxError> {
        Ok(self
            .rows()?
            .into_iter()
            .filter(OutboxRow::is_failed)
            .collect())
    }

    /// A committed document, if present.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Storage` if the store is poisoned.
    pub fn document(
        &self,
        collection: &str,
        id: Uuid,
    ) -> Result<Option<serde_json::Value>, OutboxError> {
        let state = lock(&self.state)?;
        Ok(state.document(&(collection.to_owned(), id)).cloned())
    }
}

/// A pending in-memory transaction.
///
/// Nothing is visible to other callers until [`OutboxTransaction::commit`];
/// dropping the transaction discards it. Reads are served from staged writes
/// first, then from committed state; each committed document or collection
/// read is remembered with the revision it had.
pub struct LeaseTransaction {
    state: Arc<Mutex<LeaseState>>,
    staged_rows: Vec<NewOutboxRow>,
    staged_documents: Vec<(DocumentKey, Option<serde_json::Value>)>,
    read_documents: HashMap<DocumentKey, i64>,
    read_collections: HashMap<String, i64>,
}

impl LeaseTransaction {
    fn observe(&mut self, state: &LeaseState, key: &DocumentKey) {
        self.read_documents
            .entry(key.clone())
            .or_insert_with(|| state.document_revision(key));
    }

    /// Stages an insert or replacement of a document.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Outbox` if the store is poisoned.
    pub fn put_document(
        &mut self,
        collection: &str,
        id: Uuid,
        document: serde_json::Value,
    ) -> Result<(), DomainError> {
        self.stage(collection, id, Some(document))
    }

    /// Stages a document removal.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Outbox` if the store is poisoned.
    pub fn delete_document(&mut self, collection: &str, id: Uuid) -> Result<(), DomainError> {
        self.stage(collection, id, None)
    }

    fn stage(
        &mut self,
        collection: &str,
        id: Uuid,
        document: Option<serde_json::Value>,
    ) -> Result<(), DomainError> {
        let key = (collection.to_owned(), id);
        let state = Arc::clone(&self.state);
        self.observe(&*lock(&state)?, &key);
        self.staged_documents.push((key, document));
        Ok(())
    }

    /// Reads a document as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Outbox` if the store is poisoned.
    pub fn get_document(
        &mut self,
        collection: &str,
        id: Uuid,
    ) -> Result<Option<serde_json::Value>, DomainError> {
        let key = (collection.to_owned(), id);
        if let Some((_, staged)) = self.staged_documents.iter().rev().find(|(k, _)| *k == key) {
            return Ok(staged.clone());
        }
        let state = Arc::clone(&self.state);
        let state = lock(&state)?;
        self.observe(&state, &key);
        Ok(state.document(&key).cloned())
    }

    /// Committed and staged documents of `collection`.
    ///
    /// The whole collection counts as read, so any commit that touches it
    /// in the meantime makes this transaction's commit fail.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Outbox` if the store is poisoned.
    pub fn documents(&mut self, collection: &str) -> Result<Vec<serde_json::Value>, DomainError> {
        let state = Arc::clone(&self.state);
        let state = lock(&state)?;
        self.read_collections
            .entry(collection.to_owned())
            .or_insert_with(|| state.collection_revision(collection));
        let mut view: HashMap<Uuid, serde_json::Value> = state
            .documents
            .iter()
            .filter(|((c, _), _)| c == collection)
            .filter_map(|((_, id), doc)| doc.value.clone().map(|value| (*id, value)))
            .collect();
        drop(state);
        for ((c, id), staged) in &self.staged_documents {
            if c != collection {
                continue;
            }
            match staged {
                Some(doc) => view.insert(*id, doc.clone()),
                None => view.remove(id),
            };
        }
        Ok(view.into_values().collect())
    }

    /// Finds the first read that a concurrent commit has invalidated.
    fn stale_read(&self, state: &LeaseState) -> Option<DomainError> {
        for (key, observed) in &self.read_documents {
            let current = state.document_revision(key);
            if current != *observed {
                return Some(DomainError::ConcurrencyConflict {
                    aggregate_id: key.1,
                    expected: *observed,
                    actual: current,
                });
            }
        }
        for (collection, observed) in &self.read_collections {
            let current = state.collection_revision(collection);
            if current != *observed {
                let aggregate_id = self
                    .staged_documents
                    .iter()
                    .find(|((c, _), _)| c == collection)
                    .map_or_else(Uuid::nil, |((_, id), _)| *id);
                return Some(DomainError::ConcurrencyConflict {
                    aggregate_id,
                    expected: *observed,
                    actual: current,
                });
            }
        }
        None
    }
}

#[async_trait]
impl TransactionalStore for LeaseOutboxStore {
    type Transaction = LeaseTransaction;

    async fn begin(&self) -> Result<LeaseTransaction, DomainError> {
        Ok(LeaseTransaction {
            state: Arc::clone(&self.state),
            staged_rows: Vec::new(),
            staged_documents: Vec::new(),
            read_documents: HashMap::new(),
            read_collections: HashMap::new(),
        })
    }
}

#[async_trait]
impl OutboxTransaction for LeaseTransaction {
    async fn insert_outbox_row(&mut self, row: &NewOutboxRow) -> Result<Uuid, OutboxError> {
        self.staged_rows.push(row.clone());
        Ok(row.id)
    }

    async fn commit(self) -> Result<(), DomainError> {
        let mut state = lock(&self.state)?;
        if let Some(conflict) = self.stale_read(&state) {
            warn!(error = %conflict, "lease transaction aborted on stale read");
            return Err(conflict);
        }
        for (key, staged) in self.staged_documents {
            state.write_document(key, staged);
        }
        for row in self.staged_rows {
            state.append(row);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), DomainError> {
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for LeaseOutboxStore {
    async fn claim_batch(&self, limit: usize) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        let now = self.clock.now();
        let claim_id = Uuid::new_v4();
        let mut state = lock(&self.state)?;

        let mut candidates: Vec<&mut LeasedRow> = state
            .rows
            .iter_mut()
            .filter(|leased| leased.is_claimable(now))
            .collect();
        candidates.sort_by_key(|leased| (leased.row.created_at, leased.seq));

        let mut rows = Vec::new();
        for leased in candidates.into_iter().take(limit) {
            if leased.claimed_by.is_some() {
                warn!(outbox_row_id = %leased.row.id, "reclaiming row with expired lease");
            }
            leased.claimed_by = Some(claim_id);
            leased.claim_expires_at = Some(now + self.lease);
            rows.push(leased.row.clone());
        }
        debug!(%claim_id, claimed = rows.len(), "leased outbox rows");

        Ok(Box::new(LeaseClaim {
            state: Arc::clone(&self.state),
            claim_id,
            rows,
            marks: HashMap::new(),
            settled: false,
        }))
    }

    async fn pending_count(&self) -> Result<u64, OutboxError> {
        let state = lock(&self.state)?;
        let pending = state.rows.iter().filter(|l| l.row.is_pending()).count();
        Ok(u64::try_from(pending).unwrap_or(u64::MAX))
    }
}

#[derive(Debug)]
enum Mark {
    Processed(DateTime<Utc>),
    Failed(DateTime<Utc>, String),
}

/// Rows held by one lease.
struct LeaseClaim {
    state: Arc<Mutex<LeaseState>>,
    claim_id: Uuid,
    rows: Vec<OutboxRow>,
    marks: HashMap<Uuid, Mark>,
    settled: bool,
}

impl LeaseClaim {
    fn record(&mut self, id: Uuid, mark: Mark) -> Result<(), OutboxError> {
        if !self.rows.iter().any(|row| row.id == id) {
            return Err(OutboxError::RowNotClaimed(id));
        }
        self.marks.insert(id, mark);
        Ok(())
    }
}

#[async_trait]
impl ClaimedBatch for LeaseClaim {
    fn rows(&self) -> &[OutboxRow] {
        &self.rows
    }

    async fn mark_processed(
        &mut self,
        id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        self.record(id, Mark::Processed(processed_at))
    }

    async fn mark_failed(
        &mut self,
        id: Uuid,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        self.record(id, Mark::Failed(failed_at, reason.to_owned()))
    }

    async fn commit(mut self: Box<Self>) -> Result<(), OutboxError> {
        let mut state = lock(&self.state)?;
        for leased in &mut state.rows {
            // Only rows this lease still holds; an expired and re-claimed
            // row belongs to its new claimant.
            if leased.claimed_by != Some(self.claim_id) {
                continue;
            }
            match self.marks.get(&leased.row.id) {
                Some(Mark::Processed(processed_at)) => {
                    leased.row.processed_at = Some(*processed_at);
                }
                Some(Mark::Failed(failed_at, reason)) => {
                    leased.row.failed_at = Some(*failed_at);
                    leased.row.last_error = Some(reason.clone());
                }
                None => {}
            }
            leased.release();
        }
        drop(state);
        self.settled = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), OutboxError> {
        lock(&self.state)?.release_claim(self.claim_id);
        self.settled = true;
        Ok(())
    }
}

impl Drop for LeaseClaim {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.release_claim(self.claim_id);
        }
    }
}
