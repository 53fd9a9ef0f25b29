//! Unit of work: turns buffered domain events into outbox rows inside the
//! business transaction, then notifies in-process subscribers once the
//! transaction is durable.
//!
//! Commit runs in three steps:
//!
//! 1. drain every tracked aggregate and stage one outbox row per
//!    dispatchable event in the open transaction;
//! 2. commit the transaction on a detached task, so a caller that is
//!    cancelled mid-commit cannot leave it half done;
//! 3. fan every drained event out to in-process subscribers.
//!
//! Dropping the unit of work (or the `commit` future) before step 2 starts
//! drops the transaction, which rolls back business writes and staged rows
//! together.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::aggregate::EventSource;
use crate::clock::Clock;
use crate::error::{DomainError, OutboxError};
use crate::event::DomainEvent;
use crate::outbox::{NewOutboxRow, OutboxTransaction, TransactionalStore};

/// Reacts to domain events inside the producing process.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handles one committed event.
    async fn handle(&self, event: &dyn DomainEvent) -> Result<(), DomainError>;
}

/// Routes committed events to in-process subscribers by event type.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscribers: HashMap<&'static str, Vec<Arc<dyn EventSubscriber>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<_> = self.subscribers.keys().collect();
        routes.sort();
        f.debug_struct("EventDispatcher")
            .field("routes", &routes)
            .finish()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` for events whose `event_type()` equals
    /// `event_type`.
    pub fn subscribe(&mut self, event_type: &'static str, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers
            .entry(event_type)
            .or_default()
            .push(subscriber);
    }

    /// Delivers each event, in order, to its subscribers.
    ///
    /// A failing subscriber is logged and counted; it never stops delivery
    /// to the others. Returns the number of failures.
    pub async fn dispatch(&self, events: &[Arc<dyn DomainEvent>]) -> usize {
        let mut failures = 0;
        for event in events {
            let Some(subscribers) = self.subscribers.get(event.event_type()) else {
                continue;
            };
            for subscriber in subscribers {
                if let Err(err) = subscriber.handle(event.as_ref()).await {
                    failures += 1;
                    warn!(
                        subscriber = subscriber.name(),
                        event_type = event.event_type(),
                        event_id = %event.metadata().event_id,
                        error = %err,
                        "in-process subscriber failed after commit"
                    );
                }
            }
        }
        failures
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Ids of the outbox rows written with the business change.
    pub outbox_row_ids: Vec<Uuid>,
    /// Number of events drained from tracked aggregates.
    pub events_dispatched: usize,
    /// Number of in-process subscriber calls that failed after commit.
    pub subscriber_failures: usize,
}

/// One business transaction plus the aggregates it touched.
pub struct UnitOfWork<'a, T: OutboxTransaction> {
    transaction: T,
    tracked: Vec<&'a mut dyn EventSource>,
    clock: &'a dyn Clock,
}

impl<'a, T: OutboxTransaction> UnitOfWork<'a, T> {
    /// Opens a transaction on `store`.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the transaction cannot be started.
    pub async fn begin<S>(store: &S, clock: &'a dyn Clock) -> Result<Self, DomainError>
    where
        S: TransactionalStore<Transaction = T>,
    {
        Ok(Self {
            transaction: store.begin().await?,
            tracked: Vec::new(),
            clock,
        })
    }

    /// The open transaction, for business writes.
    pub fn transaction(&mut self) -> &mut T {
        &mut self.transaction
    }

    /// Adds an aggregate whose buffered events belong to this unit of work.
    ///
    /// Track an aggregate after its state has been written; its buffer is
    /// drained on commit.
    pub fn track(&mut self, aggregate: &'a mut dyn EventSource) {
        self.tracked.push(aggregate);
    }

    /// Number of tracked aggregates.
    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// Stages outbox rows, commits, then notifies in-process subscribers.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Outbox` if staging fails, in which case the
    /// transaction is rolled back, or the store's error if the commit itself
    /// fails. Subscriber failures do not produce an error.
    #[instrument(skip_all, fields(tracked = self.tracked.len()))]
    pub async fn commit(self, dispatcher: &EventDispatcher) -> Result<CommitReceipt, DomainError> {
        let Self {
            mut transaction,
            tracked,
            clock,
        } = self;

        let mut events: Vec<Arc<dyn DomainEvent>> = Vec::new();
        for source in tracked {
            events.extend(source.drain_erased());
        }

        let mut outbox_row_ids = Vec::new();
        for event in &events {
            let Some(outbox_event) = event.as_outbox_event() else {
                continue;
            };
            let wire = outbox_event.to_wire_event().map_err(OutboxError::from)?;
            let row = NewOutboxRow::from_wire_event(wire, clock)?;
            let id = transaction.insert_outbox_row(&row).await?;
            debug!(outbox_row_id = %id, event_type = %row.event_type, "staged outbox row");
            outbox_row_ids.push(id);
        }

        tokio::spawn(transaction.commit())
            .await
            .map_err(|e| DomainError::Infrastructure(format!("commit task failed: {e}")))??;

        let subscriber_failures = dispatcher.dispatch(&events).await;

        Ok(CommitReceipt {
            outbox_row_ids,
            events_dispatched: events.len(),
            subscriber_failures,
        })
    }

    /// Abandons the unit of work, discarding business writes and leaving
    /// tracked buffers untouched.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the rollback fails.
    pub async fn rollback(self) -> Result<(), DomainError> {
        self.transaction.rollback().await
    }
}
