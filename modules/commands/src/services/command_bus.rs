//! Command bus: the transactional ingest path.
//!
//! One transaction covers the duplicate check, the PENDING command row, and
//! the outbound `command` outbox row. The fast path fires only if that
//! transaction commits.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Naming;
use crate::contracts::rows;
use crate::repos::{command_repo, command_repo::SaveCommandError, outbox_repo};

use super::relay::Relay;

#[derive(Debug, thiserror::Error)]
pub enum CommandBusError {
    #[error("idempotency key already used")]
    DuplicateIdempotency,

    #[error("command with this name and business key already exists")]
    DuplicateBusiness,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct CommandBus {
    pool: PgPool,
    relay: Arc<Relay>,
    naming: Naming,
}

impl CommandBus {
    pub fn new(pool: PgPool, relay: Arc<Relay>, naming: Naming) -> Self {
        Self { pool, relay, naming }
    }

    /// Accept a business command: record it durably, enqueue its outbound
    /// request, and arm the fast path. Returns the command id.
    pub async fn accept(
        &self,
        name: &str,
        idempotency_key: &str,
        business_key: &str,
        payload: JsonValue,
        reply_meta: &HashMap<String, String>,
    ) -> Result<Uuid, CommandBusError> {
        let mut tx = self.pool.begin().await?;

        if command_repo::exists_by_idempotency_key(&mut tx, idempotency_key).await? {
            // Dropping the transaction rolls it back; nothing was written.
            return Err(CommandBusError::DuplicateIdempotency);
        }

        let reply_json = serde_json::to_value(reply_meta)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let command_id = command_repo::save_pending(
            &mut tx,
            name,
            idempotency_key,
            business_key,
            &payload,
            &reply_json,
        )
        .await
        .map_err(|e| match e {
            SaveCommandError::DuplicateIdempotency => CommandBusError::DuplicateIdempotency,
            SaveCommandError::DuplicateBusiness => CommandBusError::DuplicateBusiness,
            SaveCommandError::Database(e) => CommandBusError::Database(e),
        })?;

        let row = rows::command_requested(
            &self.naming,
            name,
            command_id,
            business_key,
            payload,
            reply_meta,
        );

        let mut fast_path = self.relay.fast_path();
        let now = chrono::Utc::now();
        let outbox_id = outbox_repo::add_returning_id(&mut tx, &row, now).await?;
        fast_path.arm(outbox_id);

        tx.commit().await?;
        fast_path.fire();

        tracing::info!(
            command_id = %command_id,
            name,
            business_key,
            "command accepted"
        );

        Ok(command_id)
    }
}
