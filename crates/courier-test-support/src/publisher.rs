//! Test publishers: `MessagePublisher` implementations for poller tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::publisher::{MessagePublisher, PublishError};

/// One message the bus accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Wire event type.
    pub event_type: String,
    /// Published bytes.
    pub payload: Vec<u8>,
}

impl Delivery {
    /// The payload parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not JSON.
    #[must_use]
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("delivery payload is not JSON")
    }
}

/// A publisher that accepts every message and records it.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    delivered: Mutex<Vec<Delivery>>,
}

impl RecordingPublisher {
    /// Creates an empty recording publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every accepted message.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.delivered.lock().unwrap().push(Delivery {
            event_type: event_type.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

/// A publisher that fails selected attempts and records the rest.
///
/// Attempts are numbered from 1 across the publisher's lifetime, so a test
/// can fail "the third publish" and let the retry in the next cycle succeed.
#[derive(Debug, Default)]
pub struct FailingPublisher {
    failing_attempts: HashSet<usize>,
    failing_event_types: HashSet<String>,
    attempts: Mutex<usize>,
    delivered: Mutex<Vec<Delivery>>,
}

impl FailingPublisher {
    /// Fails the given attempt numbers with a transport error.
    #[must_use]
    pub fn on_attempts(attempts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing_attempts: attempts.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Rejects every message of the given event type.
    #[must_use]
    pub fn on_event_type(event_type: &str) -> Self {
        Self {
            failing_event_types: HashSet::from([event_type.to_string()]),
            ..Self::default()
        }
    }

    /// Also fails the given attempt numbers with a transport error.
    #[must_use]
    pub fn and_on_attempts(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.failing_attempts.extend(attempts);
        self
    }

    /// Number of publish calls so far, failed ones included.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Returns a snapshot of every accepted message.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePublisher for FailingPublisher {
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<(), PublishError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.failing_attempts.contains(&attempt) {
            return Err(PublishError::Transport("connection reset".into()));
        }
        if self.failing_event_types.contains(event_type) {
            return Err(PublishError::Rejected(format!("no route for {event_type}")));
        }
        self.delivered.lock().unwrap().push(Delivery {
            event_type: event_type.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

/// A publisher that takes `delay` before accepting each message.
#[derive(Debug)]
pub struct SlowPublisher {
    delay: Duration,
}

impl SlowPublisher {
    /// Creates a publisher that sleeps `delay` per call.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl MessagePublisher for SlowPublisher {
    async fn publish(&self, _event_type: &str, _payload: &[u8]) -> Result<(), PublishError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
