//! Consumer error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while consuming one message.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// No decoder is registered for the envelope's event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The bytes are not a `{event_type, payload}` envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The payload does not match the registered event type.
    #[error("malformed payload for {event_type}: {reason}")]
    MalformedPayload {
        /// Event type the payload claimed to be.
        event_type: String,
        /// Decoder error.
        reason: String,
    },

    /// The handler failed; the message should be redelivered.
    #[error("handler error: {0}")]
    Handler(String),

    /// Another delivery of the same event is being handled; redeliver later.
    #[error("event {0} is already being handled")]
    InFlight(Uuid),

    /// The processed-key or dead-letter store failed.
    #[error("consumer storage error: {0}")]
    Storage(String),
}

impl ConsumeError {
    /// Returns `true` for errors that redelivery can never fix.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::UnknownEventType(_) | Self::MalformedEnvelope(_) | Self::MalformedPayload { .. }
        )
    }
}

impl From<sqlx::Error> for ConsumeError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
