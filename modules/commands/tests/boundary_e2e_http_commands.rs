mod common;

use commands_rs::config::Naming;
use commands_rs::consumer::redelivery::RedeliveryPolicy;
use commands_rs::models::CommandStatus;
use commands_rs::repos::command_repo;
use commands_rs::routes::{commands_router, AppState};
use commands_rs::services::command_bus::CommandBus;
use commands_rs::services::executor::Executor;
use commands_rs::services::handlers::{CreateUserHandler, HandlerRegistry};
use commands_rs::services::response_registry::ResponseRegistry;
use commands_rs::{start_command_consumers, start_reply_consumer};
use message_bus::InMemoryBus;
use serde_json::{json, Value as JsonValue};
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Spin the full in-process stack (in-memory bus, consumers, reply
/// consumer) and serve it on an ephemeral port. Returns the base URL.
async fn spawn_app(pool: PgPool) -> String {
    let bus = Arc::new(InMemoryBus::new());
    let relay = common::test_relay(&pool, &bus);
    let naming = Naming::default();

    let mut handlers = HandlerRegistry::new();
    handlers.register("CreateUser", Arc::new(CreateUserHandler));
    let handlers = Arc::new(handlers);

    let executor = Arc::new(Executor::new(
        pool.clone(),
        relay.clone(),
        handlers,
        naming.clone(),
        Duration::from_secs(30),
        "test-worker".to_string(),
    ));

    let command_bus = Arc::new(CommandBus::new(pool.clone(), relay, naming.clone()));
    let registry = ResponseRegistry::new(Duration::from_secs(2));

    let redelivery = RedeliveryPolicy {
        max_deliveries: 3,
        first_delay: Duration::from_millis(10),
        ceiling: Duration::from_millis(100),
    };
    start_command_consumers(bus.clone(), executor, naming.clone(), redelivery).await;
    start_reply_consumer(
        bus.clone(),
        registry.clone(),
        naming.reply_queue().to_string(),
    )
    .await;

    let state = AppState {
        command_bus,
        registry,
        sync_wait: Duration::from_secs(2),
        default_reply_queue: naming.reply_queue().to_string(),
    };

    let app = commands_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind an ephemeral port");
    let addr = listener.local_addr().expect("listener has an address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server should run");
    });

    format!("http://{addr}")
}

fn command_id_header(response: &reqwest::Response) -> Uuid {
    let raw = response
        .headers()
        .get("x-command-id")
        .expect("X-Command-Id header should be set")
        .to_str()
        .expect("header should be ascii");
    Uuid::parse_str(raw).expect("X-Command-Id should be a uuid")
}

/// TEST 1: Submitting without an Idempotency-Key is a validation error
#[tokio::test]
#[serial]
async fn test_missing_idempotency_key_is_rejected() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let base = spawn_app(pool.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/commands/CreateUser"))
        .json(&json!({"username": "alice"}))
        .send()
        .await
        .expect("request should complete");

    assert_eq!(response.status(), 400);

    let body: JsonValue = response.json().await.expect("error body is JSON");
    assert_eq!(body["error"], "missing_idempotency_key");

    common::cleanup_all(&pool).await;
}

/// TEST 2: Happy path over HTTP — the command executes and all three
/// outbox rows publish
#[tokio::test]
#[serial]
async fn test_http_happy_path() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let base = spawn_app(pool.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/commands/CreateUser"))
        .header("Idempotency-Key", "http-happy-1")
        .json(&json!({"username": "alice"}))
        .send()
        .await
        .expect("request should complete");

    let status = response.status().as_u16();
    assert!(
        status == 200 || status == 202,
        "submission must be accepted, got {status}"
    );

    let command_id = command_id_header(&response);
    assert_eq!(
        response
            .headers()
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok()),
        Some(command_id.to_string().as_str()),
        "correlation id equals the command id"
    );

    if status == 200 {
        let body: JsonValue = response.json().await.expect("reply body is JSON");
        assert_eq!(body["created"], true);
        assert_eq!(body["username"], "alice");
    }

    // Whatever the synchronous window saw, the background outcome is the
    // same: SUCCEEDED with command + reply + event all published.
    let settled = common::wait_for(
        || {
            let pool = pool.clone();
            async move {
                let command = command_repo::find(&pool, command_id).await.ok().flatten();
                let succeeded =
                    matches!(command, Some(c) if c.status == CommandStatus::Succeeded);
                succeeded && common::count_outbox_with_status(&pool, "PUBLISHED").await == 3
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(settled, "command should settle with three published rows");

    let dlq: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM command_dlq")
        .fetch_one(&pool)
        .await
        .expect("should count DLQ");
    assert_eq!(dlq, 0);

    common::cleanup_all(&pool).await;
}

/// TEST 3: Replaying the same Idempotency-Key is answered with 409 and
/// writes nothing new
#[tokio::test]
#[serial]
async fn test_http_duplicate_idempotency_key() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let base = spawn_app(pool.clone()).await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/commands/CreateUser"))
        .header("Idempotency-Key", "http-dup-1")
        .json(&json!({"username": "bob"}))
        .send()
        .await
        .expect("request should complete");
    assert!(first.status().is_success() || first.status().as_u16() == 202);

    let second = client
        .post(format!("{base}/commands/CreateUser"))
        .header("Idempotency-Key", "http-dup-1")
        .json(&json!({"username": "bob"}))
        .send()
        .await
        .expect("request should complete");

    assert_eq!(second.status(), 409);

    let body: JsonValue = second.json().await.expect("error body is JSON");
    assert_eq!(body["error"], "duplicate_idempotency_key");

    let commands: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM command")
        .fetch_one(&pool)
        .await
        .expect("should count commands");
    assert_eq!(commands, 1);

    common::cleanup_all(&pool).await;
}

/// TEST 4: A permanent business failure surfaces as CommandFailed and the
/// command is parked
#[tokio::test]
#[serial]
async fn test_http_permanent_failure() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let base = spawn_app(pool.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/commands/CreateUser"))
        .header("Idempotency-Key", "http-perm-1")
        .json(&json!({"failPermanent": true}))
        .send()
        .await
        .expect("request should complete");

    let status = response.status().as_u16();
    assert!(status == 200 || status == 202, "got {status}");

    let command_id = command_id_header(&response);

    if status == 200 {
        let body: JsonValue = response.json().await.expect("reply body is JSON");
        assert_eq!(body["error"], "Invariant broken");
    }

    let settled = common::wait_for(
        || {
            let pool = pool.clone();
            async move {
                let command = command_repo::find(&pool, command_id).await.ok().flatten();
                matches!(command, Some(c) if c.status == CommandStatus::Failed)
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(settled, "command should settle as FAILED");

    let dlq: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM command_dlq WHERE command_id = $1")
        .bind(command_id)
        .fetch_one(&pool)
        .await
        .expect("should count DLQ");
    assert_eq!(dlq, 1, "the failed command is parked exactly once");

    common::cleanup_all(&pool).await;
}

/// TEST 5: Reply-To is honored — the reply lands on the caller's queue,
/// not the default one
#[tokio::test]
#[serial]
async fn test_http_custom_reply_destination() {
    let pool = common::get_test_pool().await;
    common::cleanup_all(&pool).await;

    let base = spawn_app(pool.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/commands/CreateUser"))
        .header("Idempotency-Key", "http-replyto-1")
        .header("Reply-To", "callers.replies")
        .json(&json!({"username": "carol"}))
        .send()
        .await
        .expect("request should complete");

    // The reply bypasses the default reply queue, so the synchronous
    // window cannot resolve: the submission degrades to 202.
    assert_eq!(response.status(), 202);

    let reply_landed = common::wait_for(
        || {
            let pool = pool.clone();
            async move {
                let count: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM outbox WHERE topic = 'callers.replies' AND status = 'PUBLISHED'",
                )
                .fetch_one(&pool)
                .await
                .unwrap_or(0);
                count == 1
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(reply_landed, "the reply should publish to the caller's queue");

    common::cleanup_all(&pool).await;
}
