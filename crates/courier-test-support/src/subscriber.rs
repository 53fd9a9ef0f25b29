//! Test subscribers: In-process `EventSubscriber` implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use courier_core::error::DomainError;
use courier_core::event::DomainEvent;
use courier_core::unit_of_work::EventSubscriber;

/// A subscriber that records the type of every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    seen: Mutex<Vec<String>>,
}

impl RecordingSubscriber {
    /// Creates an empty recording subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Event types received so far, in delivery order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle(&self, event: &dyn DomainEvent) -> Result<(), DomainError> {
        self.seen.lock().unwrap().push(event.event_type().to_string());
        Ok(())
    }
}

/// A subscriber that always fails. Useful for checking that a failing side
/// effect does not undo a commit.
#[derive(Debug)]
pub struct FailingSubscriber;

#[async_trait]
impl EventSubscriber for FailingSubscriber {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn handle(&self, _event: &dyn DomainEvent) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("mail relay unavailable".into()))
    }
}
