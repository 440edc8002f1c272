//! Outbox repository
//!
//! Rows move NEW → CLAIMED → PUBLISHED; a failed publish moves CLAIMED back
//! to NEW with a future `next_at`. PUBLISHED is terminal. Claim correctness
//! rests on conditional updates and `FOR UPDATE SKIP LOCKED`, never on an
//! application lock.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{NewOutboxRow, OutboxRow};

const RETURNING_COLUMNS: &str = r#"
    o.id, o.category, o.topic, o.key, o.message_type, o.payload, o.headers,
    o.status, o.attempts, o.next_at, o.claimed_by, o.created_at,
    o.published_at, o.last_error
"#;

/// Insert a NEW row inside the ambient transaction, returning its id
pub async fn add_returning_id(
    tx: &mut Transaction<'_, Postgres>,
    row: &NewOutboxRow,
    now: DateTime<Utc>,
) -> Result<Uuid, sqlx::Error> {
    let headers = serde_json::to_value(&row.headers)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO outbox
            (id, category, topic, key, message_type, payload, headers, status, attempts, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'NEW', 0, $8)
        "#,
    )
    .bind(row.id)
    .bind(row.category)
    .bind(&row.topic)
    .bind(&row.key)
    .bind(&row.message_type)
    .bind(&row.payload)
    .bind(headers)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(row.id)
}

/// Fast-path claim of a single row: NEW → CLAIMED, or nothing if another
/// worker got there first (or the row is already published).
pub async fn claim_one(pool: &PgPool, id: Uuid) -> Result<Option<OutboxRow>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE outbox o
        SET status = 'CLAIMED'
        WHERE o.id = $1 AND o.status = 'NEW'
        RETURNING {RETURNING_COLUMNS}
        "#
    );

    sqlx::query_as::<_, OutboxRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Batch claim for the sweep: up to `max` eligible NEW rows in insertion
/// order, skipping rows another worker holds locked. Atomic — no two
/// workers ever receive the same row.
pub async fn claim(
    pool: &PgPool,
    max: i64,
    claimer: &str,
    now: DateTime<Utc>,
) -> Result<Vec<OutboxRow>, sqlx::Error> {
    let sql = format!(
        r#"
        WITH eligible AS (
            SELECT id
            FROM outbox
            WHERE status = 'NEW'
              AND COALESCE(next_at, 'epoch'::timestamptz) <= $1
            ORDER BY created_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        UPDATE outbox o
        SET status = 'CLAIMED', claimed_by = $3
        FROM eligible
        WHERE o.id = eligible.id
        RETURNING {RETURNING_COLUMNS}
        "#
    );

    let mut rows = sqlx::query_as::<_, OutboxRow>(&sql)
        .bind(now)
        .bind(max)
        .bind(claimer)
        .fetch_all(pool)
        .await?;

    // UPDATE ... RETURNING does not preserve the CTE's order
    rows.sort_by_key(|r| r.created_at);

    Ok(rows)
}

/// CLAIMED (or NEW, when a fast path raced the sweep) → PUBLISHED
pub async fn mark_published(
    pool: &PgPool,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox
        SET status = 'PUBLISHED', published_at = $2
        WHERE id = $1 AND status IN ('CLAIMED', 'NEW')
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// CLAIMED → NEW with a future eligibility instant after a failed publish
pub async fn reschedule(
    pool: &PgPool,
    id: Uuid,
    next_at: DateTime<Utc>,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox
        SET status = 'NEW', attempts = attempts + 1, next_at = $2,
            last_error = $3, claimed_by = NULL
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(next_at)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}
