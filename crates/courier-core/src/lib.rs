//! Courier Core: Domain abstractions for the transactional outbox.
//!
//! This crate defines the aggregate event buffer, the unit of work that
//! stages outbox rows alongside business writes, and the storage and
//! publisher contracts the poller and consumers depend on. It contains no
//! database or message-bus code.

pub mod aggregate;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod event;
pub mod outbox;
pub mod publisher;
pub mod unit_of_work;
