//! Message publisher abstraction.
//!
//! The only capability the core needs from a message bus.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Why a publish attempt failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The bus could not be reached or dropped the connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The publish did not complete within the allotted time.
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    /// The bus refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl PublishError {
    /// Returns `true` if retrying the same message cannot succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Delivers a typed payload to the message bus.
///
/// Acknowledgement and redelivery are the bus's concern; a returned `Ok`
/// means the bus accepted the message.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes `payload` under `event_type`.
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<(), PublishError>;
}
