//! Courier Poller: Moves committed outbox rows onto the message bus.
//!
//! Any number of pollers may run against the same store. Each cycle claims
//! a batch of pending rows, publishes them in creation order, marks the
//! successes processed and commits or rolls back according to the
//! configured [`RetryPolicy`](config::RetryPolicy).

pub mod config;
pub mod error;
pub mod log_publisher;
pub mod poller;

pub use config::{PollerConfig, RetryPolicy};
pub use error::PollerError;
pub use log_publisher::LogPublisher;
pub use poller::{OutboxPoller, PollReport};
