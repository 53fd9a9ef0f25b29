//! Shared test doubles for Courier.

mod clock;
mod publisher;
mod subscriber;

pub use clock::FixedClock;
pub use publisher::{Delivery, FailingPublisher, RecordingPublisher, SlowPublisher};
pub use subscriber::{FailingSubscriber, RecordingSubscriber};
