//! Poller behaviour against the in-memory lease store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use courier_core::outbox::OutboxStore;
use courier_core::publisher::MessagePublisher;
use courier_outbox_store::LeaseOutboxStore;
use courier_poller::{OutboxPoller, PollReport, PollerConfig, RetryPolicy};
use courier_test_support::{FailingPublisher, FixedClock, RecordingPublisher, SlowPublisher};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

fn store_with_rows(count: usize) -> LeaseOutboxStore {
    let store = LeaseOutboxStore::new(Arc::new(FixedClock::reference()));
    for n in 0..count {
        store
            .insert("VehicleRegistered", &format!(r#"{{"n":{n}}}"#))
            .unwrap();
    }
    store
}

fn poller(
    store: &LeaseOutboxStore,
    publisher: Arc<dyn MessagePublisher>,
    config: PollerConfig,
) -> OutboxPoller {
    OutboxPoller::new(
        Arc::new(store.clone()),
        publisher,
        Arc::new(FixedClock::reference()),
        config,
    )
}

#[tokio::test]
async fn test_cycle_publishes_in_creation_order_and_marks_rows() {
    // Arrange
    let store = store_with_rows(3);
    let publisher = Arc::new(RecordingPublisher::new());
    let poller = poller(&store, publisher.clone(), PollerConfig::default());

    // Act
    let report = poller.run_once().await.unwrap();

    // Assert
    assert_eq!(
        report,
        PollReport {
            claimed: 3,
            published: 3,
            ..PollReport::default()
        }
    );
    let order: Vec<i64> = publisher
        .delivered()
        .iter()
        .map(|d| d.json()["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert!(
        store
            .rows()
            .unwrap()
            .iter()
            .all(|row| row.processed_at == Some(FixedClock::reference().0))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_concurrent_pollers_process_every_row_exactly_once() {
    // Arrange
    let store = store_with_rows(25);
    let publisher = Arc::new(RecordingPublisher::new());
    let config = PollerConfig::default().with_batch_size(20);

    // Act
    let mut pollers = JoinSet::new();
    for _ in 0..2 {
        let poller = poller(&store, publisher.clone(), config.clone());
        pollers.spawn(async move { poller.run_once().await.unwrap() });
    }
    let mut reports = Vec::new();
    while let Some(report) = pollers.join_next().await {
        reports.push(report.unwrap());
    }

    // Assert
    let claimed: usize = reports.iter().map(|r| r.claimed).sum();
    assert_eq!(claimed, 25);
    assert!(reports.iter().all(|r| r.claimed <= 20));
    let delivered = publisher.delivered();
    assert_eq!(delivered.len(), 25);
    let distinct: HashSet<Vec<u8>> = delivered.into_iter().map(|d| d.payload).collect();
    assert_eq!(distinct.len(), 25);
    assert_eq!(store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_atomic_failure_rolls_back_then_retry_processes_all() {
    // Arrange
    let store = store_with_rows(5);
    let publisher = Arc::new(FailingPublisher::on_attempts([3]));
    let poller = poller(
        &store,
        publisher.clone(),
        PollerConfig::default().with_retry_policy(RetryPolicy::BatchAtomic),
    );

    // Act
    let first = poller.run_once().await.unwrap();
    let pending_after_failure = store.pending_count().await.unwrap();
    let second = poller.run_once().await.unwrap();

    // Assert
    assert!(first.rolled_back);
    assert_eq!(first.published, 2);
    assert_eq!(first.failed, 1);
    assert_eq!(pending_after_failure, 5);
    assert_eq!(second.published, 5);
    assert!(!second.rolled_back);
    assert_eq!(store.pending_count().await.unwrap(), 0);
    // Rows 1 and 2 went out twice: delivery is at-least-once.
    assert_eq!(publisher.delivered().len(), 7);
}

#[tokio::test]
async fn test_per_row_failure_stops_the_cycle_to_keep_order() {
    // Arrange
    let store = store_with_rows(5);
    let publisher = Arc::new(FailingPublisher::on_attempts([3]));
    let poller = poller(&store, publisher.clone(), PollerConfig::default());

    // Act
    let first = poller.run_once().await.unwrap();
    let pending: Vec<String> = store
        .rows()
        .unwrap()
        .into_iter()
        .filter(|row| row.is_pending())
        .map(|row| row.payload)
        .collect();
    let second = poller.run_once().await.unwrap();

    // Assert
    assert_eq!(first.published, 2);
    assert_eq!(first.failed, 1);
    assert_eq!(first.deferred, 2);
    assert!(!first.rolled_back);
    assert_eq!(
        pending,
        vec![
            r#"{"n":2}"#.to_string(),
            r#"{"n":3}"#.to_string(),
            r#"{"n":4}"#.to_string(),
        ]
    );
    assert_eq!(second.claimed, 3);
    assert_eq!(second.published, 3);
    assert_eq!(store.pending_count().await.unwrap(), 0);
    let order: Vec<i64> = publisher
        .delivered()
        .iter()
        .map(|d| d.json()["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

fn store_with_rejected_head() -> LeaseOutboxStore {
    let store = LeaseOutboxStore::new(Arc::new(FixedClock::reference()));
    store.insert("Unroutable", "{}").unwrap();
    for n in 0..5 {
        store
            .insert("VehicleRegistered", &format!(r#"{{"n":{n}}}"#))
            .unwrap();
    }
    store
}

#[tokio::test]
async fn test_rejected_head_row_is_parked_under_batch_atomic() {
    // Arrange
    let store = store_with_rejected_head();
    let publisher = Arc::new(FailingPublisher::on_event_type("Unroutable"));
    let poller = poller(
        &store,
        publisher.clone(),
        PollerConfig::default().with_retry_policy(RetryPolicy::BatchAtomic),
    );

    // Act
    let first = poller.run_once().await.unwrap();
    let second = poller.run_once().await.unwrap();

    // Assert
    assert_eq!(
        first,
        PollReport {
            claimed: 6,
            published: 5,
            rejected: 1,
            ..PollReport::default()
        }
    );
    assert_eq!(second, PollReport::default());
    assert_eq!(store.pending_count().await.unwrap(), 0);
    let failed = store.failed_rows().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].event_type, "Unroutable");
    assert!(failed[0].last_error.as_deref().unwrap().contains("no route"));
    assert_eq!(failed[0].failed_at, Some(FixedClock::reference().0));
    assert_eq!(publisher.delivered().len(), 5);
    assert_eq!(publisher.attempts(), 6);
}

#[tokio::test]
async fn test_rejected_head_row_is_parked_under_per_row() {
    // Arrange
    let store = store_with_rejected_head();
    let publisher = Arc::new(FailingPublisher::on_event_type("Unroutable"));
    let poller = poller(&store, publisher.clone(), PollerConfig::default());

    // Act
    let first = poller.run_once().await.unwrap();
    let second = poller.run_once().await.unwrap();

    // Assert
    assert_eq!(first.published, 5);
    assert_eq!(first.rejected, 1);
    assert_eq!(first.deferred, 0);
    assert_eq!(second.claimed, 0);
    assert_eq!(store.failed_rows().unwrap().len(), 1);
    assert_eq!(publisher.attempts(), 6);
}

#[tokio::test]
async fn test_rollback_after_a_rejection_keeps_the_rejected_row_pending() {
    // Arrange
    let store = store_with_rejected_head();
    let publisher =
        Arc::new(FailingPublisher::on_event_type("Unroutable").and_on_attempts([3]));
    let poller = poller(
        &store,
        publisher,
        PollerConfig::default().with_retry_policy(RetryPolicy::BatchAtomic),
    );

    // Act
    let first = poller.run_once().await.unwrap();
    let second = poller.run_once().await.unwrap();

    // Assert
    assert!(first.rolled_back);
    assert_eq!(first.rejected, 1);
    assert_eq!(first.failed, 1);
    assert!(store.failed_rows().unwrap().is_empty());
    assert_eq!(second.rejected, 1);
    assert_eq!(second.published, 5);
    assert_eq!(store.failed_rows().unwrap().len(), 1);
    assert_eq!(store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_publish_timeout_counts_as_failure() {
    // Arrange
    let store = store_with_rows(1);
    let publisher = Arc::new(SlowPublisher::new(Duration::from_millis(200)));
    let poller = poller(
        &store,
        publisher,
        PollerConfig::default().with_publish_timeout(Duration::from_millis(10)),
    );

    // Act
    let report = poller.run_once().await.unwrap();

    // Assert
    assert_eq!(report.failed, 1);
    assert_eq!(report.published, 0);
    assert_eq!(store.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_processed_rows_are_terminal() {
    // Arrange
    let store = store_with_rows(2);
    let publisher = Arc::new(RecordingPublisher::new());
    let poller = poller(&store, publisher.clone(), PollerConfig::default());
    poller.run_once().await.unwrap();

    // Act
    let report = poller.run_once().await.unwrap();

    // Assert
    assert_eq!(report, PollReport::default());
    assert_eq!(publisher.delivered().len(), 2);
}

#[tokio::test]
async fn test_batch_size_caps_each_cycle() {
    let store = store_with_rows(5);
    let publisher = Arc::new(RecordingPublisher::new());
    let poller = poller(
        &store,
        publisher,
        PollerConfig::default().with_batch_size(2),
    );

    let report = poller.run_once().await.unwrap();

    assert_eq!(report.claimed, 2);
    assert_eq!(store.pending_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_run_drains_the_outbox_and_stops_on_shutdown() {
    // Arrange
    let store = store_with_rows(5);
    let publisher = Arc::new(RecordingPublisher::new());
    let poller = poller(
        &store,
        publisher.clone(),
        PollerConfig::default()
            .with_batch_size(2)
            .with_poll_interval(Duration::from_millis(10)),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Act
    let handle = tokio::spawn(poller.run(shutdown_rx));
    for _ in 0..100 {
        if store.pending_count().await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(()).unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;

    // Assert
    assert!(stopped.is_ok());
    assert_eq!(store.pending_count().await.unwrap(), 0);
    assert_eq!(publisher.delivered().len(), 5);
}
