//! Poller configuration.

use std::str::FromStr;
use std::time::Duration;

use courier_core::outbox::DEFAULT_BATCH_SIZE;

use crate::error::PollerError;

/// How a cycle reacts when one row of its batch fails to publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Stop at the first failure and roll the whole batch back. Every row,
    /// including those already published, is retried next cycle.
    BatchAtomic,
    /// Leave the failed row pending and commit the marks made before it.
    /// Rows behind the failed one are not attempted this cycle, so a later
    /// event is never delivered ahead of an earlier one.
    #[default]
    PerRow,
}

impl FromStr for RetryPolicy {
    type Err = PollerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch_atomic" => Ok(Self::BatchAtomic),
            "per_row" => Ok(Self::PerRow),
            other => Err(PollerError::Config(format!(
                "unknown retry policy {other:?}, expected per_row or batch_atomic"
            ))),
        }
    }
}

/// Settings for one [`OutboxPoller`](crate::OutboxPoller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub publish_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(60),
            publish_timeout: Duration::from_millis(5000),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl PollerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Reads `OUTBOX_*` settings through `lookup`, falling back to defaults
    /// for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `PollerError::Config` if a value is set but cannot be parsed,
    /// or if the batch size, poll interval or publish timeout is zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PollerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let batch_size = parse_or(&lookup, "OUTBOX_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(PollerError::Config(
                "OUTBOX_BATCH_SIZE must be greater than zero".into(),
            ));
        }
        let poll_interval = parse_or(
            &lookup,
            "OUTBOX_POLL_INTERVAL_SECS",
            defaults.poll_interval.as_secs(),
        )?;
        if poll_interval == 0 {
            return Err(PollerError::Config(
                "OUTBOX_POLL_INTERVAL_SECS must be greater than zero".into(),
            ));
        }
        let publish_timeout = parse_or(
            &lookup,
            "OUTBOX_PUBLISH_TIMEOUT_MS",
            u64::try_from(defaults.publish_timeout.as_millis()).unwrap_or(u64::MAX),
        )?;
        if publish_timeout == 0 {
            return Err(PollerError::Config(
                "OUTBOX_PUBLISH_TIMEOUT_MS must be greater than zero".into(),
            ));
        }
        let retry_policy = match lookup("OUTBOX_RETRY_POLICY") {
            Some(raw) => raw.parse()?,
            None => defaults.retry_policy,
        };

        Ok(Self {
            batch_size,
            poll_interval: Duration::from_secs(poll_interval),
            publish_timeout: Duration::from_millis(publish_timeout),
            retry_policy,
        })
    }

    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`PollerConfig::from_lookup`].
    pub fn from_env() -> Result<Self, PollerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, PollerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| PollerError::Config(format!("{key} must be a valid number: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = PollerConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, PollerConfig::default());
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_policy, RetryPolicy::PerRow);
    }

    #[test]
    fn test_reads_every_setting() {
        // Arrange
        let lookup = lookup_from(&[
            ("OUTBOX_BATCH_SIZE", "50"),
            ("OUTBOX_POLL_INTERVAL_SECS", "5"),
            ("OUTBOX_PUBLISH_TIMEOUT_MS", "250"),
            ("OUTBOX_RETRY_POLICY", "batch_atomic"),
        ]);

        // Act
        let config = PollerConfig::from_lookup(lookup).unwrap();

        // Assert
        assert_eq!(
            config,
            PollerConfig::new()
                .with_batch_size(50)
                .with_poll_interval(Duration::from_secs(5))
                .with_publish_timeout(Duration::from_millis(250))
                .with_retry_policy(RetryPolicy::BatchAtomic)
        );
    }

    #[test]
    fn test_rejects_unparseable_batch_size() {
        let result = PollerConfig::from_lookup(lookup_from(&[("OUTBOX_BATCH_SIZE", "many")]));

        assert!(
            matches!(result, Err(PollerError::Config(msg)) if msg.contains("OUTBOX_BATCH_SIZE"))
        );
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let result = PollerConfig::from_lookup(lookup_from(&[("OUTBOX_BATCH_SIZE", "0")]));

        assert!(matches!(result, Err(PollerError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let result =
            PollerConfig::from_lookup(lookup_from(&[("OUTBOX_POLL_INTERVAL_SECS", "0")]));

        assert!(matches!(
            result,
            Err(PollerError::Config(msg)) if msg.contains("OUTBOX_POLL_INTERVAL_SECS")
        ));
    }

    #[test]
    fn test_rejects_zero_publish_timeout() {
        let result =
            PollerConfig::from_lookup(lookup_from(&[("OUTBOX_PUBLISH_TIMEOUT_MS", "0")]));

        assert!(matches!(
            result,
            Err(PollerError::Config(msg)) if msg.contains("OUTBOX_PUBLISH_TIMEOUT_MS")
        ));
    }

    #[test]
    fn test_retry_policy_parsing_ignores_case() {
        assert_eq!("PER_ROW".parse::<RetryPolicy>().unwrap(), RetryPolicy::PerRow);
        assert_eq!(
            " batch_atomic ".parse::<RetryPolicy>().unwrap(),
            RetryPolicy::BatchAtomic
        );
        assert!("exactly_once".parse::<RetryPolicy>().is_err());
    }
}
