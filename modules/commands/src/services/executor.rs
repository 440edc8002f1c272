//! Inbox-based idempotent executor: the transactional consume path.
//!
//! One transaction covers the inbox insert, the command status transition,
//! and the reply/event outbox rows. The three handler failure kinds have
//! three distinct fates:
//!
//! - Permanent: the failure IS the recorded state. FAILED status, DLQ
//!   entry, and failure reply/event rows all commit together, and no error
//!   propagates to the message layer — propagating would roll the
//!   quarantine back.
//! - RetryableBusiness / Transient: the transaction rolls back (the inbox
//!   row with it, so redelivery runs the handler again), the retry counter
//!   is bumped outside the transaction, and the error propagates so the
//!   consumer redelivers.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Naming;
use crate::contracts::headers::{MSG_COMMAND_COMPLETED, MSG_COMMAND_FAILED};
use crate::contracts::{rows, MessageEnvelope};
use crate::repos::{command_repo, dlq_repo, inbox_repo, outbox_repo};

use super::handlers::{HandlerFailure, HandlerRegistry};
use super::relay::Relay;

/// Inbox identity of this consumer
pub const EXECUTOR_HANDLER: &str = "CommandExecutor";

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The delivery should be retried: business- or infrastructure-level
    /// retryable failure.
    #[error("retryable failure: {0}")]
    Retry(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct Executor {
    pool: PgPool,
    relay: Arc<Relay>,
    handlers: Arc<HandlerRegistry>,
    naming: Naming,
    lease: Duration,
    host: String,
}

impl Executor {
    pub fn new(
        pool: PgPool,
        relay: Arc<Relay>,
        handlers: Arc<HandlerRegistry>,
        naming: Naming,
        lease: Duration,
        host: String,
    ) -> Self {
        Self {
            pool,
            relay,
            handlers,
            naming,
            lease,
            host,
        }
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.names()
    }

    /// Process one inbound command delivery.
    pub async fn process(&self, envelope: &MessageEnvelope) -> Result<(), ProcessError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if !inbox_repo::mark_if_absent(&mut tx, envelope.message_id, EXECUTOR_HANDLER, now).await? {
            tracing::debug!(
                message_id = %envelope.message_id,
                command_id = %envelope.command_id,
                "duplicate delivery, first outcome stands"
            );
            return Ok(());
        }

        let lease_until = now
            + chrono::Duration::from_std(self.lease)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        command_repo::mark_running(&mut tx, envelope.command_id, lease_until, now).await?;

        let outcome = match self.handlers.get(&envelope.name) {
            Some(handler) => handler.invoke(&envelope.name, &envelope.payload).await,
            None => Err(HandlerFailure::Permanent(format!(
                "no handler registered for command {}",
                envelope.name
            ))),
        };

        match outcome {
            Ok(result) => {
                command_repo::mark_succeeded(&mut tx, envelope.command_id, now).await?;

                let reply_row =
                    rows::reply(&self.naming, envelope, MSG_COMMAND_COMPLETED, result.clone());
                let event_row = rows::event(
                    self.naming.event_topic(&envelope.name),
                    &envelope.key,
                    MSG_COMMAND_COMPLETED,
                    result,
                );

                let mut fast_path = self.relay.fast_path();
                fast_path.arm(outbox_repo::add_returning_id(&mut tx, &reply_row, now).await?);
                fast_path.arm(outbox_repo::add_returning_id(&mut tx, &event_row, now).await?);

                tx.commit().await?;
                fast_path.fire();

                tracing::info!(
                    command_id = %envelope.command_id,
                    name = %envelope.name,
                    "command succeeded"
                );
                Ok(())
            }

            Err(HandlerFailure::Permanent(msg)) => {
                command_repo::mark_failed(&mut tx, envelope.command_id, &msg, now).await?;

                let retries = command_repo::find_in_tx(&mut tx, envelope.command_id)
                    .await?
                    .map(|c| c.retries)
                    .unwrap_or(0);

                dlq_repo::park(
                    &mut tx,
                    envelope.command_id,
                    &envelope.name,
                    &envelope.key,
                    &envelope.payload,
                    "FAILED",
                    "Permanent",
                    &msg,
                    retries,
                    &self.host,
                    now,
                )
                .await?;

                let failure = json!({ "error": msg });
                let reply_row =
                    rows::reply(&self.naming, envelope, MSG_COMMAND_FAILED, failure.clone());
                let event_row = rows::event(
                    self.naming.event_topic(&envelope.name),
                    &envelope.key,
                    MSG_COMMAND_FAILED,
                    failure,
                );

                let mut fast_path = self.relay.fast_path();
                fast_path.arm(outbox_repo::add_returning_id(&mut tx, &reply_row, now).await?);
                fast_path.arm(outbox_repo::add_returning_id(&mut tx, &event_row, now).await?);

                tx.commit().await?;
                fast_path.fire();

                tracing::warn!(
                    command_id = %envelope.command_id,
                    name = %envelope.name,
                    error = %msg,
                    "command failed permanently, parked in DLQ"
                );
                Ok(())
            }

            Err(HandlerFailure::RetryableBusiness(msg)) | Err(HandlerFailure::Transient(msg)) => {
                tx.rollback().await?;
                command_repo::bump_retry(&self.pool, envelope.command_id, &msg).await?;

                tracing::warn!(
                    command_id = %envelope.command_id,
                    name = %envelope.name,
                    error = %msg,
                    "retryable failure, awaiting redelivery"
                );
                Err(ProcessError::Retry(msg))
            }
        }
    }
}
