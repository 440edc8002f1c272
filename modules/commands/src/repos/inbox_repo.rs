//! Inbox repository: the idempotency primitive of the consume path.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// Record that `handler` processed `message_id`, unless it already did.
///
/// Returns true when the insert won — this is the first time the handler
/// sees the message. Runs inside the ambient transaction so the verdict is
/// linearizable with every side effect written alongside it.
pub async fn mark_if_absent(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    handler: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO inbox (message_id, handler, processed_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (message_id, handler) DO NOTHING
        "#,
    )
    .bind(message_id)
    .bind(handler)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}
