//! Static event registry.
//!
//! Built once at startup: each wire `event_type` maps to a decode function
//! producing the consumer's own message type `M`. Lookup is by exact
//! string match; there is no fallback and no reflection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use courier_core::envelope::WireEnvelope;
use courier_core::event::WirePayload;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::ConsumeError;

/// A message decoded from a wire envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage<M> {
    /// Identity of the originating domain event; the idempotency key.
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub message: M,
}

type Decoder<M> =
    Box<dyn Fn(serde_json::Value) -> Result<Decoded<M>, serde_json::Error> + Send + Sync>;

struct Decoded<M> {
    event_id: Uuid,
    aggregate_id: Uuid,
    occurred_at: DateTime<Utc>,
    message: M,
}

/// Maps wire event types to typed decoders.
pub struct EventRegistry<M> {
    decoders: HashMap<&'static str, Decoder<M>>,
}

impl<M> std::fmt::Debug for EventRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut event_types: Vec<_> = self.decoders.keys().collect();
        event_types.sort();
        f.debug_struct("EventRegistry")
            .field("event_types", &event_types)
            .finish()
    }
}

impl<M> Default for EventRegistry<M> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<M: 'static> EventRegistry<M> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `event_type`, decoding its payload as `WirePayload<T>` and
    /// wrapping the event data with `wrap`.
    ///
    /// Registering the same event type twice replaces the earlier decoder.
    #[must_use]
    pub fn register<T, F>(mut self, event_type: &'static str, wrap: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> M + Send + Sync + 'static,
    {
        let decoder: Decoder<M> = Box::new(move |payload| {
            let wire: WirePayload<T> = serde_json::from_value(payload)?;
            Ok(Decoded {
                event_id: wire.event_id,
                aggregate_id: wire.aggregate_id,
                occurred_at: wire.occurred_at,
                message: wrap(wire.data),
            })
        });
        self.decoders.insert(event_type, decoder);
        self
    }

    /// Returns `true` if `event_type` has a decoder.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Decodes raw envelope bytes.
    ///
    /// # Errors
    ///
    /// Returns `MalformedEnvelope` if the bytes are not an envelope,
    /// `UnknownEventType` if the type has no decoder, and
    /// `MalformedPayload` if the payload does not fit the registered type.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedMessage<M>, ConsumeError> {
        let envelope: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| ConsumeError::MalformedEnvelope(e.to_string()))?;
        let decoder = self
            .decoders
            .get(envelope.event_type.as_str())
            .ok_or_else(|| ConsumeError::UnknownEventType(envelope.event_type.clone()))?;
        let decoded = decoder(envelope.payload).map_err(|e| ConsumeError::MalformedPayload {
            event_type: envelope.event_type.clone(),
            reason: e.to_string(),
        })?;

        Ok(DecodedMessage {
            event_id: decoded.event_id,
            event_type: envelope.event_type,
            aggregate_id: decoded.aggregate_id,
            occurred_at: decoded.occurred_at,
            message: decoded.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Registered {
        plate: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Message {
        Registered(Registered),
    }

    fn registry() -> EventRegistry<Message> {
        EventRegistry::new().register("VehicleRegistered", Message::Registered)
    }

    fn envelope(event_type: &str, payload: &serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({ "event_type": event_type, "payload": payload })).unwrap()
    }

    #[test]
    fn test_decodes_registered_event_type() {
        // Arrange
        let event_id = Uuid::new_v4();
        let bytes = envelope(
            "VehicleRegistered",
            &json!({
                "event_id": event_id,
                "aggregate_id": Uuid::new_v4(),
                "occurred_at": "2026-01-15T10:00:00Z",
                "plate": "AB-123",
            }),
        );

        // Act
        let decoded = registry().decode(&bytes).unwrap();

        // Assert
        assert_eq!(decoded.event_id, event_id);
        assert_eq!(decoded.event_type, "VehicleRegistered");
        assert_eq!(
            decoded.message,
            Message::Registered(Registered {
                plate: "AB-123".to_owned()
            })
        );
    }

    #[test]
    fn test_unknown_event_type_is_reported_by_name() {
        let bytes = envelope("VehicleScrapped", &json!({}));

        let result = registry().decode(&bytes);

        assert!(matches!(result, Err(ConsumeError::UnknownEventType(t)) if t == "VehicleScrapped"));
    }

    #[test]
    fn test_event_type_match_is_exact() {
        let bytes = envelope("vehicleregistered", &json!({}));

        assert!(matches!(
            registry().decode(&bytes),
            Err(ConsumeError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_payload_missing_identity_is_malformed() {
        let bytes = envelope("VehicleRegistered", &json!({ "plate": "AB-123" }));

        assert!(matches!(
            registry().decode(&bytes),
            Err(ConsumeError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_non_envelope_bytes_are_malformed() {
        assert!(matches!(
            registry().decode(b"\x00\x01"),
            Err(ConsumeError::MalformedEnvelope(_))
        ));
    }
}
