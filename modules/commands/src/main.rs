use axum::{routing::get, Router};
use chrono::Utc;
use message_bus::{CommandQueue, EventPublisher, InMemoryBus, NatsBus};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use commands_rs::{
    config::Config,
    consumer::redelivery::RedeliveryPolicy,
    db::init_pool,
    health::{health_live, health_ready},
    repos::command_repo,
    routes::{commands_router, AppState},
    services::command_bus::CommandBus,
    services::executor::Executor,
    services::handlers::{CreateUserHandler, HandlerRegistry},
    services::relay::{run_sweeper, Relay},
    services::response_registry::ResponseRegistry,
    start_command_consumers, start_reply_consumer,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting commands service...");

    let config = Config::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        "Configuration loaded: host={}, port={}, bus_type={}",
        config.host,
        config.port,
        config.bus_type
    );

    tracing::info!("Connecting to database...");
    let pool = init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running migrations...");
    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // One bus object serves both transports
    let (queue, events): (Arc<dyn CommandQueue>, Arc<dyn EventPublisher>) =
        match config.bus_type.to_lowercase().as_str() {
            "inmemory" => {
                tracing::info!("Using in-memory bus");
                let bus = Arc::new(InMemoryBus::new());
                (bus.clone(), bus)
            }
            "nats" => {
                tracing::info!("Connecting to NATS at {}", config.nats_url);
                let client = async_nats::connect(&config.nats_url)
                    .await
                    .expect("Failed to connect to NATS");
                let bus = Arc::new(NatsBus::new(client));
                (bus.clone(), bus)
            }
            other => panic!("Invalid BUS_TYPE: {}. Must be 'inmemory' or 'nats'", other),
        };

    let host_identity = std::env::var("HOSTNAME")
        .unwrap_or_else(|_| format!("commands-{}", std::process::id()));

    let relay = Arc::new(Relay::new(
        pool.clone(),
        queue.clone(),
        events.clone(),
        host_identity.clone(),
        config.sweep_batch_size,
        config.max_backoff,
    ));

    let mut handlers = HandlerRegistry::new();
    handlers.register("CreateUser", Arc::new(CreateUserHandler));
    let handlers = Arc::new(handlers);

    let executor = Arc::new(Executor::new(
        pool.clone(),
        relay.clone(),
        handlers,
        config.naming.clone(),
        config.command_lease,
        host_identity,
    ));

    let command_bus = Arc::new(CommandBus::new(
        pool.clone(),
        relay.clone(),
        config.naming.clone(),
    ));

    let registry = ResponseRegistry::new(config.sync_wait);

    let redelivery = RedeliveryPolicy {
        max_deliveries: config.consumer_max_attempts,
        ..RedeliveryPolicy::default()
    };
    start_command_consumers(queue.clone(), executor, config.naming.clone(), redelivery).await;
    start_reply_consumer(
        queue.clone(),
        registry.clone(),
        config.naming.reply_queue().to_string(),
    )
    .await;

    let sweeper_relay = relay.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        run_sweeper(sweeper_relay, sweep_interval).await;
    });

    tracing::info!("Background outbox sweeper started");

    if !config.lease_reaper_interval.is_zero() {
        let reaper_pool = pool.clone();
        let reaper_interval = config.lease_reaper_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(reaper_interval).await;
                match command_repo::recover_expired_leases(&reaper_pool, Utc::now()).await {
                    Ok(0) => {}
                    Ok(recovered) => {
                        tracing::warn!(recovered, "expired command leases marked TIMED_OUT")
                    }
                    Err(e) => tracing::error!(error = %e, "lease recovery failed"),
                }
            }
        });
        tracing::info!("Lease reaper started");
    }

    let state = AppState {
        command_bus,
        registry,
        sync_wait: config.sync_wait,
        default_reply_queue: config.naming.reply_queue().to_string(),
    };

    let app = Router::new()
        .route("/api/health", get(health_ready))
        .route("/api/health/live", get(health_live))
        .with_state(pool.clone())
        .merge(commands_router(state))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Commands service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
