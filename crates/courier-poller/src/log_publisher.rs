//! A publisher that writes messages to the log instead of a bus.
//!
//! The poller binary uses it until a bus adapter is wired in; it is also
//! handy for watching the outbox drain in development.

use async_trait::async_trait;
use courier_core::envelope::{WireEnvelope, routing_key};
use courier_core::publisher::{MessagePublisher, PublishError};
use tracing::info;

/// Logs each message under its routing key.
#[derive(Debug, Clone)]
pub struct LogPublisher {
    service_name: String,
}

impl LogPublisher {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

#[async_trait]
impl MessagePublisher for LogPublisher {
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<(), PublishError> {
        let envelope = WireEnvelope::from_parts(event_type, payload)
            .map_err(|e| PublishError::Rejected(format!("payload is not JSON: {e}")))?;
        let bytes = envelope
            .to_bytes()
            .map_err(|e| PublishError::Rejected(e.to_string()))?;

        info!(
            routing_key = %routing_key(&self.service_name, event_type),
            bytes = bytes.len(),
            envelope = %String::from_utf8_lossy(&bytes),
            "published"
        );
        Ok(())
    }
}
