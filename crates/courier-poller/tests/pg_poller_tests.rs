//! Poller behaviour against PostgreSQL.

use std::sync::Arc;

use chrono::Utc;
use courier_core::outbox::{NewOutboxRow, OutboxStore, OutboxTransaction, TransactionalStore};
use courier_outbox_store::PgOutboxStore;
use courier_poller::{OutboxPoller, PollerConfig, RetryPolicy};
use courier_test_support::{FailingPublisher, FixedClock, RecordingPublisher};
use sqlx::PgPool;
use tokio::task::JoinSet;
use uuid::Uuid;

async fn seed(store: &PgOutboxStore, count: usize) {
    seed_types(store, &vec!["VehicleRegistered"; count]).await;
}

async fn seed_types(store: &PgOutboxStore, event_types: &[&str]) {
    let mut tx = store.begin().await.unwrap();
    for (n, event_type) in event_types.iter().enumerate() {
        tx.insert_outbox_row(&NewOutboxRow {
            id: Uuid::now_v7(),
            event_type: (*event_type).to_string(),
            payload: format!(r#"{{"n":{n}}}"#),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_pollers_never_publish_a_row_twice(pool: PgPool) {
    // Arrange
    let store = PgOutboxStore::new(pool);
    seed(&store, 25).await;
    let publisher = Arc::new(RecordingPublisher::new());

    // Act
    let mut pollers = JoinSet::new();
    for _ in 0..2 {
        let poller = OutboxPoller::new(
            Arc::new(store.clone()),
            publisher.clone(),
            Arc::new(FixedClock::reference()),
            PollerConfig::default().with_batch_size(20),
        );
        pollers.spawn(async move { poller.run_once().await.unwrap() });
    }
    while let Some(report) = pollers.join_next().await {
        report.unwrap();
    }
    // A poller that claimed nothing because the other still held every
    // remaining row gets another turn.
    let sweeper = OutboxPoller::new(
        Arc::new(store.clone()),
        publisher.clone(),
        Arc::new(FixedClock::reference()),
        PollerConfig::default().with_batch_size(20),
    );
    sweeper.run_once().await.unwrap();

    // Assert
    assert_eq!(store.pending_count().await.unwrap(), 0);
    assert_eq!(publisher.delivered().len(), 25);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_batch_atomic_rollback_leaves_rows_pending(pool: PgPool) {
    // Arrange
    let store = PgOutboxStore::new(pool);
    seed(&store, 5).await;
    let poller = OutboxPoller::new(
        Arc::new(store.clone()),
        Arc::new(FailingPublisher::on_attempts([3])),
        Arc::new(FixedClock::reference()),
        PollerConfig::default().with_retry_policy(RetryPolicy::BatchAtomic),
    );

    // Act
    let first = poller.run_once().await.unwrap();
    let pending_after_failure = store.pending_count().await.unwrap();
    poller.run_once().await.unwrap();

    // Assert
    assert!(first.rolled_back);
    assert_eq!(pending_after_failure, 5);
    assert_eq!(store.pending_count().await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_rejected_row_is_parked_and_the_rest_drain(pool: PgPool) {
    // Arrange
    let store = PgOutboxStore::new(pool);
    seed_types(
        &store,
        &["Unroutable", "VehicleRegistered", "VehicleRegistered"],
    )
    .await;
    let publisher = Arc::new(FailingPublisher::on_event_type("Unroutable"));
    let poller = OutboxPoller::new(
        Arc::new(store.clone()),
        publisher.clone(),
        Arc::new(FixedClock::reference()),
        PollerConfig::default().with_retry_policy(RetryPolicy::BatchAtomic),
    );

    // Act
    let first = poller.run_once().await.unwrap();
    let second = poller.run_once().await.unwrap();

    // Assert
    assert_eq!(first.rejected, 1);
    assert_eq!(first.published, 2);
    assert!(!first.rolled_back);
    assert_eq!(second.claimed, 0);
    assert_eq!(store.pending_count().await.unwrap(), 0);
    let failed = store.failed_rows().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].event_type, "Unroutable");
    assert!(failed[0].last_error.as_deref().unwrap().contains("no route"));
}
