//! Idempotent message consumption.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::clock::Clock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dead_letter::{DeadLetter, DeadLetterStore};
use crate::error::ConsumeError;
use crate::processed::{KeyClaim, ProcessedKeyStore};
use crate::registry::{DecodedMessage, EventRegistry};

/// Applies the effect of one decoded message.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    /// Handles `message`. An error leaves the message unprocessed so the
    /// bus can redeliver it.
    async fn handle(&self, message: &DecodedMessage<M>) -> Result<(), ConsumeError>;
}

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The handler ran and the event id was recorded.
    Processed(Uuid),
    /// The event id was already recorded; the handler did not run.
    Duplicate(Uuid),
    /// The message can never be decoded and was dead-lettered.
    DeadLettered { reason: String },
}

/// Decodes, deduplicates and handles messages for one named consumer.
///
/// Deduplication is keyed by the originating event id, so a redelivered
/// message or a row republished after a rolled-back poll cycle has no
/// second effect. The key is claimed before the handler runs: a delivery
/// that arrives while another is still being handled fails with
/// [`ConsumeError::InFlight`] and is left for redelivery.
pub struct IdempotentConsumer<M> {
    name: &'static str,
    registry: EventRegistry<M>,
    handler: Arc<dyn MessageHandler<M>>,
    processed: Arc<dyn ProcessedKeyStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    clock: Arc<dyn Clock>,
}

impl<M> std::fmt::Debug for IdempotentConsumer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentConsumer")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<M: Send + Sync + 'static> IdempotentConsumer<M> {
    #[must_use]
    pub fn new(
        name: &'static str,
        registry: EventRegistry<M>,
        handler: Arc<dyn MessageHandler<M>>,
        processed: Arc<dyn ProcessedKeyStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            registry,
            handler,
            processed,
            dead_letters,
            clock,
        }
    }

    /// Consumes one raw message.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, `ConsumeError::InFlight` while another
    /// delivery of the event is being handled, or a storage error from the
    /// processed-key or dead-letter store. Decode failures are not errors:
    /// they are dead-lettered and reported as
    /// [`ConsumeOutcome::DeadLettered`].
    #[instrument(skip(self, bytes), fields(consumer = self.name))]
    pub async fn consume(&self, bytes: &[u8]) -> Result<ConsumeOutcome, ConsumeError> {
        let message = match self.registry.decode(bytes) {
            Ok(message) => message,
            Err(err) if err.is_permanent() => return self.dead_letter(bytes, &err).await,
            Err(err) => return Err(err),
        };

        match self.processed.try_claim(self.name, message.event_id).await? {
            KeyClaim::Acquired => {}
            KeyClaim::Completed => {
                debug!(event_id = %message.event_id, "duplicate delivery skipped");
                return Ok(ConsumeOutcome::Duplicate(message.event_id));
            }
            KeyClaim::InFlight => {
                warn!(
                    event_id = %message.event_id,
                    "event is being handled by a concurrent delivery"
                );
                return Err(ConsumeError::InFlight(message.event_id));
            }
        }

        if let Err(err) = self.handler.handle(&message).await {
            if let Err(release_err) = self.processed.release(self.name, message.event_id).await {
                warn!(
                    event_id = %message.event_id,
                    error = %release_err,
                    "could not release claim after handler failure"
                );
            }
            return Err(err);
        }

        self.processed.complete(self.name, message.event_id).await?;
        debug!(
            event_id = %message.event_id,
            event_type = %message.event_type,
            "message processed"
        );
        Ok(ConsumeOutcome::Processed(message.event_id))
    }

    async fn dead_letter(
        &self,
        bytes: &[u8],
        err: &ConsumeError,
    ) -> Result<ConsumeOutcome, ConsumeError> {
        let reason = err.to_string();
        let event_type = match err {
            ConsumeError::UnknownEventType(event_type)
            | ConsumeError::MalformedPayload { event_type, .. } => Some(event_type.clone()),
            _ => None,
        };
        self.dead_letters
            .record(DeadLetter {
                id: Uuid::now_v7(),
                event_type,
                envelope: bytes.to_vec(),
                reason: reason.clone(),
                dead_lettered_at: self.clock.now(),
            })
            .await?;
        info!(reason = %reason, "message dead-lettered");
        Ok(ConsumeOutcome::DeadLettered { reason })
    }
}
