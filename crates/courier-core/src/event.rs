//! Domain event abstractions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Monotonically increasing position within the aggregate's buffer.
    pub sequence_number: i64,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type name (used for in-process routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// Returns the outbox capability when this event must leave the process.
    ///
    /// Events that only matter to in-process subscribers keep the default.
    fn as_outbox_event(&self) -> Option<&dyn OutboxEvent> {
        None
    }
}

/// Capability of domain events that are delivered to other services.
///
/// Only events exposing this capability are written to the outbox.
pub trait OutboxEvent: Send + Sync {
    /// Maps the event onto its wire representation.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if the payload cannot be encoded.
    fn to_wire_event(&self) -> Result<WireEvent, serde_json::Error>;
}

/// The wire representation of a dispatchable event.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    /// Wire type name; consumers resolve it by exact match.
    pub event_type: String,
    /// Type-specific JSON object.
    pub payload: serde_json::Value,
}

/// Standard wire payload body.
///
/// Carries the event's own identity so that consumers can deduplicate
/// redeliveries by `event_id` rather than by arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload<T> {
    /// Identity of the domain event that produced this message.
    pub event_id: Uuid,
    /// Aggregate the event was raised on.
    pub aggregate_id: Uuid,
    /// When the event was raised.
    pub occurred_at: DateTime<Utc>,
    /// Event-specific fields.
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> WirePayload<T> {
    /// Builds a wire payload from an event's metadata and its data.
    pub fn from_metadata(metadata: &EventMetadata, data: T) -> Self {
        Self {
            event_id: metadata.event_id,
            aggregate_id: metadata.aggregate_id,
            occurred_at: metadata.occurred_at,
            data,
        }
    }

    /// Converts into a [`WireEvent`] with the given wire type name.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if `T` cannot be encoded as a JSON
    /// object.
    pub fn into_wire_event(
        self,
        event_type: impl Into<String>,
    ) -> Result<WireEvent, serde_json::Error> {
        Ok(WireEvent {
            event_type: event_type.into(),
            payload: serde_json::to_value(&self)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Renamed {
        name: String,
    }

    #[test]
    fn test_wire_payload_flattens_data_next_to_identity() {
        // Arrange
        let metadata = EventMetadata {
            event_id: Uuid::new_v4(),
            event_type: "test.renamed".to_owned(),
            aggregate_id: Uuid::new_v4(),
            sequence_number: 1,
            correlation_id: Uuid::new_v4(),
            causation_id: Uuid::new_v4(),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        };

        // Act
        let wire = WirePayload::from_metadata(
            &metadata,
            Renamed {
                name: "Ada".to_owned(),
            },
        )
        .into_wire_event("Renamed")
        .unwrap();

        // Assert
        assert_eq!(wire.event_type, "Renamed");
        assert_eq!(wire.payload["name"], json!("Ada"));
        assert_eq!(wire.payload["event_id"], json!(metadata.event_id));
        assert_eq!(wire.payload["aggregate_id"], json!(metadata.aggregate_id));

        let decoded: WirePayload<Renamed> = serde_json::from_value(wire.payload).unwrap();
        assert_eq!(decoded.event_id, metadata.event_id);
        assert_eq!(decoded.data.name, "Ada");
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("unencodable field"))
        }
    }

    #[test]
    fn test_unencodable_data_is_an_error_not_null() {
        let metadata = EventMetadata {
            event_id: Uuid::new_v4(),
            event_type: "test.broken".to_owned(),
            aggregate_id: Uuid::new_v4(),
            sequence_number: 1,
            correlation_id: Uuid::nil(),
            causation_id: Uuid::nil(),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        };

        let result = WirePayload::from_metadata(&metadata, Unencodable).into_wire_event("Broken");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("unencodable field"));
    }
}
