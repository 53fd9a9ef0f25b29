//! Wire envelope exchanged with the message bus.

use serde::{Deserialize, Serialize};

/// `{event_type, payload}` as it travels over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Wire event type name.
    pub event_type: String,
    /// Type-specific JSON object.
    pub payload: serde_json::Value,
}

impl WireEnvelope {
    /// Wraps a stored outbox payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` is not valid JSON.
    pub fn from_parts(event_type: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event_type.to_owned(),
            payload: serde_json::from_slice(payload)?,
        })
    }

    /// Encodes the envelope as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Routing key convention: `{service-name}.{event-type}`.
#[must_use]
pub fn routing_key(service_name: &str, event_type: &str) -> String {
    format!("{service_name}.{event_type}")
}
