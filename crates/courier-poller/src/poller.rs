//! The outbox poller.

use std::sync::Arc;
use std::time::Duration;

use courier_core::clock::Clock;
use courier_core::outbox::{OutboxRow, OutboxStore};
use courier_core::publisher::{MessagePublisher, PublishError};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, instrument, warn};

use crate::config::{PollerConfig, RetryPolicy};
use crate::error::PollerError;

/// Shortest period `run` will poll at.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Rows claimed at the start of the cycle.
    pub claimed: usize,
    /// Rows the publisher accepted.
    pub published: usize,
    /// Rows whose publish failed or timed out; they stay pending.
    pub failed: usize,
    /// Rows the bus permanently refused; they are parked as failed and
    /// never claimed again.
    pub rejected: usize,
    /// Rows left unpublished behind a failed row, so that they are not
    /// delivered ahead of it.
    pub deferred: usize,
    /// `true` if the batch was rolled back; no row was marked, even those
    /// counted in `published` or `rejected`.
    pub rolled_back: bool,
}

/// Claims pending outbox rows, publishes them and marks them processed.
pub struct OutboxPoller {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn MessagePublisher>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
}

impl std::fmt::Debug for OutboxPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxPoller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OutboxPoller {
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn MessagePublisher>,
        clock: Arc<dyn Clock>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            config,
        }
    }

    /// Runs a single claim → publish → mark → commit cycle.
    ///
    /// A rejected row is parked and the cycle moves on. A transient failure
    /// either rolls the batch back or, under `PerRow`, ends the cycle with
    /// the marks made so far.
    ///
    /// # Errors
    ///
    /// Returns `PollerError::Outbox` if claiming, marking or committing
    /// fails. The claim is released in that case and every row it held is
    /// pending again.
    #[instrument(skip(self), fields(policy = ?self.config.retry_policy))]
    pub async fn run_once(&self) -> Result<PollReport, PollerError> {
        let mut batch = self.store.claim_batch(self.config.batch_size).await?;
        let rows: Vec<OutboxRow> = batch.rows().to_vec();
        let mut report = PollReport {
            claimed: rows.len(),
            ..PollReport::default()
        };

        if rows.is_empty() {
            batch.commit().await?;
            debug!("no pending outbox rows");
            return Ok(report);
        }

        for (position, row) in rows.iter().enumerate() {
            let err = match self.publish(row).await {
                Ok(()) => {
                    batch.mark_processed(row.id, self.clock.now()).await?;
                    report.published += 1;
                    continue;
                }
                Err(err) => err,
            };

            if err.is_permanent() {
                batch
                    .mark_failed(row.id, &err.to_string(), self.clock.now())
                    .await?;
                report.rejected += 1;
                warn!(
                    outbox_row_id = %row.id,
                    event_type = %row.event_type,
                    error = %err,
                    "publish rejected, row parked as failed"
                );
                continue;
            }

            report.failed += 1;
            warn!(
                outbox_row_id = %row.id,
                event_type = %row.event_type,
                error = %err,
                "publish failed"
            );
            match self.config.retry_policy {
                RetryPolicy::BatchAtomic => {
                    batch.rollback().await?;
                    report.rolled_back = true;
                    warn!(
                        claimed = report.claimed,
                        "batch rolled back, every row returns to pending"
                    );
                    return Ok(report);
                }
                RetryPolicy::PerRow => {
                    report.deferred = rows.len() - position - 1;
                    break;
                }
            }
        }

        batch.commit().await?;
        info!(
            claimed = report.claimed,
            published = report.published,
            failed = report.failed,
            rejected = report.rejected,
            deferred = report.deferred,
            "poll cycle committed"
        );
        Ok(report)
    }

    async fn publish(&self, row: &OutboxRow) -> Result<(), PublishError> {
        let timeout = self.config.publish_timeout;
        time::timeout(
            timeout,
            self.publisher
                .publish(&row.event_type, row.payload.as_bytes()),
        )
        .await
        .map_err(|_| PublishError::Timeout(timeout))?
    }

    /// Polls every `poll_interval` until `shutdown` fires or its sender is
    /// dropped. A cycle in progress when shutdown arrives runs to the end.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            policy = ?self.config.retry_policy,
            "Starting outbox poller"
        );

        // `time::interval` panics on a zero period.
        let mut interval = time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Outbox poller shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "Poll cycle failed");
                    }
                    match self.store.pending_count().await {
                        Ok(pending) => debug!(pending, "outbox backlog"),
                        Err(e) => warn!(error = %e, "could not count pending rows"),
                    }
                }
            }
        }
    }
}
