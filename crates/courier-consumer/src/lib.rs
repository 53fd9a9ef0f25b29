//! Courier Consumer: The receiving side of the delivery contract.
//!
//! Messages arrive at least once and in no guaranteed order across
//! batches. An [`IdempotentConsumer`] decodes each wire envelope through a
//! static [`EventRegistry`], skips event ids it has already handled, and
//! routes permanently undecodable messages to a dead-letter store instead
//! of dropping them.

pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod processed;
pub mod registry;

pub use consumer::{ConsumeOutcome, IdempotentConsumer, MessageHandler};
pub use dead_letter::{DeadLetter, DeadLetterStore, InMemoryDeadLetterStore, PgDeadLetterStore};
pub use error::ConsumeError;
pub use processed::{
    DEFAULT_CLAIM_TTL, InMemoryProcessedKeyStore, KeyClaim, PgProcessedKeyStore,
    ProcessedKeyStore,
};
pub use registry::{DecodedMessage, EventRegistry};
