//! Outbox relay
//!
//! Pulls claimed outbox rows and writes them to the transport their
//! category names. Publish failures never leave this module: the row is
//! rescheduled with capped exponential backoff and the sweep retries it.

use chrono::Utc;
use message_bus::{CommandQueue, EventPublisher};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{OutboxCategory, OutboxRow};
use crate::repos::outbox_repo;

use super::fast_path::PostCommitQueue;

pub struct Relay {
    pool: PgPool,
    queue: Arc<dyn CommandQueue>,
    events: Arc<dyn EventPublisher>,
    claimer: String,
    batch_size: i64,
    max_backoff: Duration,
}

impl Relay {
    pub fn new(
        pool: PgPool,
        queue: Arc<dyn CommandQueue>,
        events: Arc<dyn EventPublisher>,
        claimer: String,
        batch_size: i64,
        max_backoff: Duration,
    ) -> Self {
        Self {
            pool,
            queue,
            events,
            claimer,
            batch_size,
            max_backoff,
        }
    }

    /// Post-commit publish hooks for one transaction scope
    pub fn fast_path(self: &Arc<Self>) -> PostCommitQueue {
        PostCommitQueue::new(self.clone())
    }

    /// Best-effort single-row publish, used by the fast path after commit.
    ///
    /// Losing the claim race is not an error: someone else is publishing
    /// the row.
    pub async fn publish_now(&self, id: Uuid) -> Result<(), sqlx::Error> {
        if let Some(row) = outbox_repo::claim_one(&self.pool, id).await? {
            self.send_and_mark(row).await?;
        }
        Ok(())
    }

    /// Claim and publish a batch of eligible rows. Returns how many rows
    /// were claimed.
    pub async fn sweep(&self) -> Result<usize, sqlx::Error> {
        let rows =
            outbox_repo::claim(&self.pool, self.batch_size, &self.claimer, Utc::now()).await?;
        let claimed = rows.len();

        for row in rows {
            self.send_and_mark(row).await?;
        }

        Ok(claimed)
    }

    /// Dispatch one claimed row by category, then record the outcome.
    ///
    /// The returned error is a storage error only; a transport error is
    /// absorbed into a reschedule.
    async fn send_and_mark(&self, row: OutboxRow) -> Result<(), sqlx::Error> {
        let headers = row.headers_map();
        let body = serde_json::to_vec(&row.payload)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let result = match row.category {
            OutboxCategory::Command | OutboxCategory::Reply => {
                self.queue.send(&row.topic, body, &headers).await
            }
            OutboxCategory::Event => {
                self.events.publish(&row.topic, &row.key, body, &headers).await
            }
        };

        match result {
            Ok(()) => {
                outbox_repo::mark_published(&self.pool, row.id, Utc::now()).await?;
                tracing::debug!(
                    outbox_id = %row.id,
                    topic = %row.topic,
                    message_type = %row.message_type,
                    "outbox row published"
                );
            }
            Err(e) => {
                let delay = backoff_delay(row.attempts, self.max_backoff);
                let now = Utc::now();
                let next_at = now
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300));
                outbox_repo::reschedule(&self.pool, row.id, next_at, &e.to_string()).await?;
                tracing::warn!(
                    outbox_id = %row.id,
                    topic = %row.topic,
                    attempts = row.attempts + 1,
                    backoff_ms = delay.as_millis(),
                    error = %e,
                    "publish failed, outbox row rescheduled"
                );
            }
        }

        Ok(())
    }
}

/// Backoff law: `min(max_backoff, 2^max(1, attempts + 1) seconds)`.
///
/// Attempt 0 waits 2s, attempt 5 waits 64s, growth is capped at
/// `max_backoff`.
pub fn backoff_delay(attempts: i32, max_backoff: Duration) -> Duration {
    let exponent = std::cmp::max(1, attempts.saturating_add(1)) as u32;
    let millis = 2u64.saturating_pow(exponent).saturating_mul(1000);
    std::cmp::min(Duration::from_millis(millis), max_backoff)
}

/// Background sweep loop: fixed delay, one sweep at a time per process.
/// The sweep is the backstop for every row the fast path missed (crash
/// between commit and publish, transport hiccups, overload).
pub async fn run_sweeper(relay: Arc<Relay>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "starting outbox sweeper");

    loop {
        tokio::time::sleep(interval).await;

        match relay.sweep().await {
            Ok(0) => {}
            Ok(claimed) => tracing::debug!(claimed, "sweep drained outbox rows"),
            Err(e) => tracing::error!(error = %e, "outbox sweep failed"),
        }
    }
}
