mod common;

use chrono::{DateTime, Utc};
use commands_rs::config::Naming;
use commands_rs::contracts::rows;
use commands_rs::models::{OutboxRow, OutboxStatus};
use commands_rs::repos::outbox_repo;
use commands_rs::services::relay::Relay;
use futures::StreamExt;
use message_bus::{EventPublisher, InMemoryBus};
use serde_json::json;
use serial_test::serial;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn insert_event_row(pool: &PgPool, topic: &str, key: &str) -> Uuid {
    let row = rows::event(
        topic.to_string(),
        key,
        "CommandCompleted",
        json!({"ok": true}),
    );

    let mut tx = pool.begin().await.expect("should begin tx");
    let id = outbox_repo::add_returning_id(&mut tx, &row, Utc::now())
        .await
        .expect("should insert outbox row");
    tx.commit().await.expect("should commit");

    id
}

async fn insert_command_row(pool: &PgPool, name: &str) -> Uuid {
    let row = rows::command_requested(
        &Naming::default(),
        name,
        Uuid::new_v4(),
        "biz-key",
        json!({"n": 1}),
        &HashMap::new(),
    );

    let mut tx = pool.begin().await.expect("should begin tx");
    let id = outbox_repo::add_returning_id(&mut tx, &row, Utc::now())
        .await
        .expect("should insert outbox row");
    tx.commit().await.expect("should commit");

    id
}

async fn fetch_row(pool: &PgPool, id: Uuid) -> OutboxRow {
    sqlx::query_as::<_, OutboxRow>("SELECT * FROM outbox WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("outbox row should exist")
}

/// TEST 1: Concurrent batch claims never hand out the same row twice
#[tokio::test]
#[serial]
async fn test_concurrent_claims_are_disjoint() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    for i in 0..10 {
        insert_event_row(&pool, &format!("events.Claim{i}"), "k").await;
    }

    let (left, right) = tokio::join!(
        outbox_repo::claim(&pool, 10, "worker-a", Utc::now()),
        outbox_repo::claim(&pool, 10, "worker-b", Utc::now()),
    );

    let left = left.expect("claim should succeed");
    let right = right.expect("claim should succeed");

    let left_ids: HashSet<Uuid> = left.iter().map(|r| r.id).collect();
    let right_ids: HashSet<Uuid> = right.iter().map(|r| r.id).collect();

    assert!(
        left_ids.is_disjoint(&right_ids),
        "no row may be claimed by two workers"
    );
    assert_eq!(left_ids.len() + right_ids.len(), 10, "every row is claimed once");

    for row in left.iter().chain(right.iter()) {
        assert_eq!(row.status, OutboxStatus::Claimed);
    }

    common::cleanup_all(&pool).await;
}

/// TEST 2: The single-row claim is won at most once
#[tokio::test]
#[serial]
async fn test_claim_one_is_exclusive() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let id = insert_event_row(&pool, "events.ClaimOne", "k").await;

    let first = outbox_repo::claim_one(&pool, id)
        .await
        .expect("claim should succeed");
    assert!(first.is_some(), "the first claim wins the row");

    let second = outbox_repo::claim_one(&pool, id)
        .await
        .expect("claim should succeed");
    assert!(second.is_none(), "the row is no longer NEW");

    common::cleanup_all(&pool).await;
}

/// TEST 3: A committed row left behind by a crashed fast path is drained
/// by the sweep and published exactly once
#[tokio::test]
#[serial]
async fn test_sweep_drains_rows_the_fast_path_missed() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let bus = Arc::new(InMemoryBus::new());
    let mut events = bus
        .subscribe_events("events.Sweep")
        .await
        .expect("should subscribe");

    // Simulated crash: the row committed but no fast path ever fired
    let id = insert_event_row(&pool, "events.Sweep", "sweep-key").await;

    let relay = common::test_relay(&pool, &bus);
    let claimed = relay.sweep().await.expect("sweep should succeed");
    assert_eq!(claimed, 1);

    let row = fetch_row(&pool, id).await;
    assert_eq!(row.status, OutboxStatus::Published);
    assert!(row.published_at.is_some());

    let msg = tokio::time::timeout(Duration::from_secs(1), events.next())
        .await
        .expect("the event should arrive")
        .expect("stream should stay open");
    assert_eq!(msg.subject, "events.Sweep");
    assert_eq!(msg.header(message_bus::HEADER_ROUTING_KEY), Some("sweep-key"));

    // A second sweep finds nothing: PUBLISHED is terminal
    let claimed = relay.sweep().await.expect("sweep should succeed");
    assert_eq!(claimed, 0, "the row must not publish twice");

    common::cleanup_all(&pool).await;
}

/// TEST 4: A failed publish reschedules the row with backoff instead of
/// losing it or leaking the error
#[tokio::test]
#[serial]
async fn test_publish_failure_reschedules_with_backoff() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let flaky = common::FlakyQueue::failing(u32::MAX);
    let events = Arc::new(InMemoryBus::new());
    let relay = Relay::new(
        pool.clone(),
        flaky.clone(),
        events,
        "test-worker".to_string(),
        500,
        Duration::from_secs(300),
    );

    let id = insert_command_row(&pool, "Backoff").await;
    let before = Utc::now();

    relay
        .publish_now(id)
        .await
        .expect("publish failure must not leak out of the relay");

    let row = fetch_row(&pool, id).await;
    assert_eq!(row.status, OutboxStatus::New, "the row goes back to NEW");
    assert_eq!(row.attempts, 1);
    assert!(
        row.last_error.as_deref().unwrap_or("").contains("broker unavailable"),
        "the transport error is recorded"
    );

    // First failure waits 2^max(1, 0+1) = 2 seconds
    let next_at = row.next_at.expect("a rescheduled row has next_at");
    let delay = next_at - before;
    assert!(delay >= chrono::Duration::seconds(1), "delay was {delay}");
    assert!(delay <= chrono::Duration::seconds(3), "delay was {delay}");

    // Not eligible again until next_at passes
    let claimed = relay.sweep().await.expect("sweep should succeed");
    assert_eq!(claimed, 0, "a backed-off row is not eligible yet");

    common::cleanup_all(&pool).await;
}

/// TEST 5: Broker down then up — attempts grow monotonically, and the row
/// publishes exactly once after recovery
#[tokio::test]
#[serial]
async fn test_broker_outage_then_recovery() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let flaky = common::FlakyQueue::failing(2);
    let events = Arc::new(InMemoryBus::new());
    let relay = Relay::new(
        pool.clone(),
        flaky.clone(),
        events,
        "test-worker".to_string(),
        500,
        Duration::from_secs(300),
    );

    let id = insert_command_row(&pool, "Outage").await;

    relay.publish_now(id).await.expect("first attempt");
    let after_first = fetch_row(&pool, id).await;
    assert_eq!(after_first.attempts, 1);
    let first_delay = after_first.next_at.expect("rescheduled") - Utc::now();

    common::force_outbox_eligible(&pool, id).await;
    relay.sweep().await.expect("second attempt");
    let after_second = fetch_row(&pool, id).await;
    assert_eq!(after_second.attempts, 2);
    let second_delay = after_second.next_at.expect("rescheduled") - Utc::now();

    assert!(
        second_delay > first_delay,
        "backoff must grow: {first_delay} then {second_delay}"
    );

    // Broker is back
    common::force_outbox_eligible(&pool, id).await;
    let claimed = relay.sweep().await.expect("third attempt");
    assert_eq!(claimed, 1);

    let row = fetch_row(&pool, id).await;
    assert_eq!(row.status, OutboxStatus::Published);

    let sent = flaky.sent();
    assert_eq!(sent.len(), 1, "the broker saw exactly one successful send");
    assert_eq!(sent[0].0, "APP.CMD.Outage.Q");

    common::cleanup_all(&pool).await;
}

/// TEST 6: Batch claim drains a burst in insertion order
#[tokio::test]
#[serial]
async fn test_batch_claim_respects_insertion_order() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let mut inserted = Vec::new();
    for i in 0..5 {
        inserted.push(insert_event_row(&pool, &format!("events.Order{i}"), "k").await);
        // Distinct created_at per row
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let claimed = outbox_repo::claim(&pool, 3, "worker-a", Utc::now())
        .await
        .expect("claim should succeed");

    assert_eq!(claimed.len(), 3);
    let claimed_ids: Vec<Uuid> = claimed.iter().map(|r| r.id).collect();
    assert_eq!(claimed_ids, inserted[..3], "oldest rows are claimed first");

    let timestamps: Vec<DateTime<Utc>> = claimed.iter().map(|r| r.created_at).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);

    common::cleanup_all(&pool).await;
}
