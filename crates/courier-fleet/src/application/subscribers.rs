//! In-process subscribers for the Fleet context.

use async_trait::async_trait;
use courier_core::error::DomainError;
use courier_core::event::DomainEvent;
use courier_core::outbox::{OutboxTransaction, TransactionalStore};
use courier_core::unit_of_work::EventSubscriber;
use tracing::debug;

use crate::application::store::{FleetWrites, UserPreferences};

/// Creates default preferences for every newly registered user.
///
/// Runs after the registration has committed, in its own transaction. A
/// user that already has preferences is left alone, so replaying the event
/// is harmless.
#[derive(Debug, Clone)]
pub struct DefaultPreferences<S> {
    store: S,
}

impl<S> DefaultPreferences<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S> EventSubscriber for DefaultPreferences<S>
where
    S: TransactionalStore + 'static,
    S::Transaction: FleetWrites,
{
    fn name(&self) -> &'static str {
        "default-preferences"
    }

    async fn handle(&self, event: &dyn DomainEvent) -> Result<(), DomainError> {
        let user_id = event.metadata().aggregate_id;
        let mut tx = self.store.begin().await?;
        let created = tx
            .insert_preferences(&UserPreferences::defaults(user_id))
            .await?;
        tx.commit().await?;
        debug!(%user_id, created, "default preferences ensured");
        Ok(())
    }
}
