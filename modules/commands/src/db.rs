//! Connection pool for the command store
//!
//! Sizing follows the service's concurrency model. Every unit of work here
//! is a short transaction — one per in-flight HTTP submission, one per
//! command delivery, single statements for relay outcomes — and no
//! transaction is ever held open across a broker call. The budget covers
//! those overlapping short holds: an ingest allowance plus headroom for
//! the consumers, the sweeper, the lease reaper, and a burst of fast-path
//! publishes.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Concurrent HTTP submissions worth budgeting for by default
const INGEST_BUDGET: u32 = 8;

/// Connections the background machinery can occupy at once: consumers
/// mid-transaction, the sweeper, the reaper, fast-path publishes
const BACKGROUND_HEADROOM: u32 = 4;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    /// Resolve the pool budget, env vars taking precedence.
    ///
    /// `DB_MAX_CONNECTIONS` caps the budget where many test binaries share
    /// one Postgres server; `DB_ACQUIRE_TIMEOUT_SECS` stretches the
    /// fail-fast window for tests that nest transactions.
    pub fn from_env() -> Self {
        let max_connections =
            env_u32("DB_MAX_CONNECTIONS").unwrap_or(INGEST_BUDGET + BACKGROUND_HEADROOM);

        // One warm connection per background loop, so a sweep tick or
        // lease recovery never pays connect latency; never above the cap.
        let min_connections = env_u32("DB_MIN_CONNECTIONS")
            .unwrap_or(2)
            .min(max_connections);

        let acquire_timeout = Duration::from_secs(
            env_u32("DB_ACQUIRE_TIMEOUT_SECS").map(u64::from).unwrap_or(5),
        );

        Self {
            max_connections,
            min_connections,
            acquire_timeout,
        }
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Open the command-store pool with the resolved settings
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let settings = PoolSettings::from_env();

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await
}
