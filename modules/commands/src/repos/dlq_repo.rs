//! Dead-letter repository: insert-only parking for permanently failed
//! commands. A park shares its transaction with the FAILED status write.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub async fn park(
    tx: &mut Transaction<'_, Postgres>,
    command_id: Uuid,
    command_name: &str,
    business_key: &str,
    payload: &JsonValue,
    failed_status: &str,
    error_class: &str,
    error_message: &str,
    attempts: i32,
    parked_by: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO command_dlq
            (command_id, command_name, business_key, payload, failed_status,
             error_class, error_message, attempts, parked_by, parked_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(command_id)
    .bind(command_name)
    .bind(business_key)
    .bind(payload)
    .bind(failed_status)
    .bind(error_class)
    .bind(error_message)
    .bind(attempts)
    .bind(parked_by)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
