//! Aggregate root abstraction and the per-aggregate event buffer.

use std::sync::Arc;

use uuid::Uuid;

use crate::event::DomainEvent;

/// Ordered buffer of the domain events an aggregate raised during the
/// current unit of work.
///
/// The buffer is owned by its aggregate and deliberately not `Clone`: the
/// only way events leave it is [`EventBuffer::drain`], which empties it.
#[derive(Debug)]
pub struct EventBuffer<E> {
    events: Vec<E>,
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> EventBuffer<E> {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event. Never fails.
    pub fn raise(&mut self, event: E) {
        self.events.push(event);
    }

    /// Returns every buffered event in raise order and leaves the buffer
    /// empty. A second call in a row returns an empty vector.
    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }

    /// Events raised but not yet drained.
    #[must_use]
    pub fn pending(&self) -> &[E] {
        &self.events
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Trait for aggregate roots that buffer domain events while their state
/// changes.
pub trait AggregateRoot: Send + Sync {
    /// The event type this aggregate raises.
    type Event: DomainEvent + 'static;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current persisted version.
    fn version(&self) -> i64;

    /// Shared access to the event buffer.
    fn event_buffer(&self) -> &EventBuffer<Self::Event>;

    /// Exclusive access to the event buffer.
    fn event_buffer_mut(&mut self) -> &mut EventBuffer<Self::Event>;

    /// Returns events raised since the last drain.
    fn uncommitted_events(&self) -> &[Self::Event] {
        self.event_buffer().pending()
    }

    /// Buffers a newly raised event.
    fn raise(&mut self, event: Self::Event) {
        self.event_buffer_mut().raise(event);
    }

    /// Takes every buffered event, leaving the buffer empty.
    fn drain_events(&mut self) -> Vec<Self::Event> {
        self.event_buffer_mut().drain()
    }
}

/// Object-safe view of an aggregate used by the unit of work, which tracks
/// aggregates of different types side by side.
pub trait EventSource: Send {
    /// Identifier of the underlying aggregate.
    fn source_id(&self) -> Uuid;

    /// Drains the aggregate's buffer into type-erased events.
    fn drain_erased(&mut self) -> Vec<Arc<dyn DomainEvent>>;
}

impl<A> EventSource for A
where
    A: AggregateRoot,
{
    fn source_id(&self) -> Uuid {
        self.aggregate_id()
    }

    fn drain_erased(&mut self) -> Vec<Arc<dyn DomainEvent>> {
        self.drain_events()
            .into_iter()
            .map(|event| Arc::new(event) as Arc<dyn DomainEvent>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use chrono::{TimeZone, Utc};

    #[derive(Debug)]
    struct Ticked {
        metadata: EventMetadata,
    }

    impl DomainEvent for Ticked {
        fn event_type(&self) -> &'static str {
            "test.ticked"
        }

        fn to_payload(&self) -> serde_json::Value {
            serde_json::json!({ "seq": self.metadata.sequence_number })
        }

        fn metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    #[derive(Debug)]
    struct Counter {
        id: Uuid,
        events: EventBuffer<Ticked>,
    }

    impl Counter {
        #[allow(clippy::cast_possible_wrap)]
        fn tick(&mut self) {
            let sequence_number = self.events.len() as i64 + 1;
            self.raise(Ticked {
                metadata: EventMetadata {
                    event_id: Uuid::new_v4(),
                    event_type: "test.ticked".to_owned(),
                    aggregate_id: self.id,
                    sequence_number,
                    correlation_id: Uuid::nil(),
                    causation_id: Uuid::nil(),
                    occurred_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
                },
            });
        }
    }

    impl AggregateRoot for Counter {
        type Event = Ticked;

        fn aggregate_id(&self) -> Uuid {
            self.id
        }

        fn version(&self) -> i64 {
            0
        }

        fn event_buffer(&self) -> &EventBuffer<Ticked> {
            &self.events
        }

        fn event_buffer_mut(&mut self) -> &mut EventBuffer<Ticked> {
            &mut self.events
        }
    }

    fn counter() -> Counter {
        Counter {
            id: Uuid::new_v4(),
            events: EventBuffer::new(),
        }
    }

    #[test]
    fn test_drain_returns_events_in_raise_order() {
        // Arrange
        let mut counter = counter();
        counter.tick();
        counter.tick();
        counter.tick();

        // Act
        let drained = counter.drain_events();

        // Assert
        let sequence: Vec<i64> = drained
            .iter()
            .map(|e| e.metadata.sequence_number)
            .collect();
        assert_eq!(sequence, vec![1, 2, 3]);
    }

    #[test]
    fn test_second_drain_is_empty() {
        // Arrange
        let mut counter = counter();
        counter.tick();

        // Act
        let first = counter.drain_events();
        let second = counter.drain_events();

        // Assert
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(counter.uncommitted_events().is_empty());
    }

    #[test]
    fn test_erased_drain_keeps_order_and_empties_buffer() {
        // Arrange
        let mut counter = counter();
        counter.tick();
        counter.tick();
        let id = counter.id;

        // Act
        let source: &mut dyn EventSource = &mut counter;
        let drained = source.drain_erased();
        let again = source.drain_erased();

        // Assert
        assert_eq!(source.source_id(), id);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].metadata().sequence_number, 1);
        assert_eq!(drained[1].metadata().sequence_number, 2);
        assert!(again.is_empty());
    }
}
