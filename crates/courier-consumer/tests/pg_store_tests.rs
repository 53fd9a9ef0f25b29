//! Integration tests for the Postgres dead-letter and processed-key stores.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use courier_consumer::{
    DeadLetter, DeadLetterStore, KeyClaim, PgDeadLetterStore, PgProcessedKeyStore,
    ProcessedKeyStore,
};
use sqlx::PgPool;
use tokio::task::JoinSet;
use uuid::Uuid;

#[sqlx::test(migrations = "../../migrations")]
async fn test_key_is_claimed_once_and_completed_per_consumer(pool: PgPool) {
    let store = PgProcessedKeyStore::new(pool);
    let key = Uuid::new_v4();

    assert_eq!(store.try_claim("indexer", key).await.unwrap(), KeyClaim::Acquired);
    assert_eq!(store.try_claim("indexer", key).await.unwrap(), KeyClaim::InFlight);
    assert!(!store.is_processed("indexer", key).await.unwrap());

    store.complete("indexer", key).await.unwrap();

    assert_eq!(store.try_claim("indexer", key).await.unwrap(), KeyClaim::Completed);
    assert!(store.is_processed("indexer", key).await.unwrap());
    assert!(!store.is_processed("notifier", key).await.unwrap());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_claims_acquire_a_key_once(pool: PgPool) {
    // Arrange
    let store = PgProcessedKeyStore::new(pool);
    let key = Uuid::new_v4();

    // Act
    let mut claims = JoinSet::new();
    for _ in 0..8 {
        let store = store.clone();
        claims.spawn(async move { store.try_claim("indexer", key).await.unwrap() });
    }
    let mut acquired = 0;
    while let Some(claim) = claims.join_next().await {
        if claim.unwrap() == KeyClaim::Acquired {
            acquired += 1;
        }
    }

    // Assert
    assert_eq!(acquired, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_released_claim_can_be_retaken(pool: PgPool) {
    let store = PgProcessedKeyStore::new(pool);
    let key = Uuid::new_v4();
    store.try_claim("indexer", key).await.unwrap();

    store.release("indexer", key).await.unwrap();

    assert_eq!(store.try_claim("indexer", key).await.unwrap(), KeyClaim::Acquired);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_abandoned_claim_is_taken_over_after_ttl(pool: PgPool) {
    // Arrange
    let store = PgProcessedKeyStore::new(pool).with_claim_ttl(Duration::from_millis(50));
    let key = Uuid::new_v4();
    store.try_claim("indexer", key).await.unwrap();

    // Act
    tokio::time::sleep(Duration::from_millis(150)).await;
    let takeover = store.try_claim("indexer", key).await.unwrap();

    // Assert
    assert_eq!(takeover, KeyClaim::Acquired);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_dead_letters_round_trip_with_original_bytes(pool: PgPool) {
    // Arrange
    let store = PgDeadLetterStore::new(pool);
    let letter = DeadLetter {
        id: Uuid::now_v7(),
        event_type: Some("VehicleTeleported".to_string()),
        envelope: b"{\"event_type\":\"VehicleTeleported\"}".to_vec(),
        reason: "unknown event type: VehicleTeleported".to_string(),
        dead_lettered_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
    };

    // Act
    store.record(letter.clone()).await.unwrap();
    let listed = store.list().await.unwrap();

    // Assert
    assert_eq!(listed, vec![letter]);
}
