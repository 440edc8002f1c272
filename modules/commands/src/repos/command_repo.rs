//! Command table repository
//!
//! Owns every mutation of the `command` table. Status transitions move only
//! along PENDING → RUNNING → {SUCCEEDED, FAILED, TIMED_OUT}, with RUNNING →
//! RUNNING on retry.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::Command;

#[derive(Debug, thiserror::Error)]
pub enum SaveCommandError {
    #[error("idempotency key already used")]
    DuplicateIdempotency,

    #[error("command with this name and business key already exists")]
    DuplicateBusiness,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Insert a new PENDING command, returning its id.
///
/// The two unique constraints guard ingest idempotency; their violations
/// map to typed errors so the HTTP layer can answer 4xx.
pub async fn save_pending(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    idempotency_key: &str,
    business_key: &str,
    payload: &JsonValue,
    reply: &JsonValue,
) -> Result<Uuid, SaveCommandError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO command
            (id, name, business_key, payload, idempotency_key, status, retries, reply, requested_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, $7, $7)
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(business_key)
    .bind(payload)
    .bind(idempotency_key)
    .bind(reply)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.constraint() == Some("command_idempotency_key_key") => {
            SaveCommandError::DuplicateIdempotency
        }
        sqlx::Error::Database(db) if db.constraint() == Some("command_name_business_key_key") => {
            SaveCommandError::DuplicateBusiness
        }
        _ => SaveCommandError::Database(e),
    })?;

    Ok(id)
}

/// Point read
pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Command>, sqlx::Error> {
    sqlx::query_as::<_, Command>("SELECT * FROM command WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Point read within the ambient transaction
pub async fn find_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Command>, sqlx::Error> {
    sqlx::query_as::<_, Command>("SELECT * FROM command WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn exists_by_idempotency_key(
    tx: &mut Transaction<'_, Postgres>,
    idempotency_key: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM command WHERE idempotency_key = $1)",
    )
    .bind(idempotency_key)
    .fetch_one(&mut **tx)
    .await
}

/// PENDING/RUNNING → RUNNING, claiming the command until `lease_until`
pub async fn mark_running(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    lease_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE command
        SET status = 'RUNNING', processing_lease_until = $2, updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(lease_until)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn mark_succeeded(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE command
        SET status = 'SUCCEEDED', processing_lease_until = NULL, updated_at = $2
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn mark_failed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    error: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE command
        SET status = 'FAILED', processing_lease_until = NULL, last_error = $2, updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(error)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn mark_timed_out(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE command
        SET status = 'TIMED_OUT', processing_lease_until = NULL, last_error = $2, updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(reason)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Record a retryable failure.
///
/// Runs on the pool, not the processing transaction: the processing
/// transaction rolls back on retryable failures and the bump must survive
/// it.
pub async fn bump_retry(pool: &PgPool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE command
        SET retries = retries + 1, last_error = $2, updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(error)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark RUNNING commands whose lease expired as TIMED_OUT.
///
/// Returns the number of commands recovered.
pub async fn recover_expired_leases(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE command
        SET status = 'TIMED_OUT', last_error = 'processing lease expired', updated_at = $1
        WHERE status = 'RUNNING' AND processing_lease_until < $1
        "#,
    )
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
