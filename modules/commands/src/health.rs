//! Liveness and readiness probes
//!
//! Readiness is gated on the command store: ingest, execution, and the
//! relay all begin with a transaction against it, so an instance that
//! cannot reach Postgres must not take traffic. The probe reads the outbox
//! backlog, so readiness doubles as a drain signal for operators.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use sqlx::PgPool;

pub async fn health_live() -> Json<Value> {
    Json(json!({
        "status": "alive",
        "module": "commands",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn health_ready(State(pool): State<PgPool>) -> Result<Json<Value>, StatusCode> {
    let backlog: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE status = 'NEW'")
            .fetch_one(&pool)
            .await
            .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(json!({
        "status": "ready",
        "module": "commands",
        "version": env!("CARGO_PKG_VERSION"),
        "database": "connected",
        "outbox_backlog": backlog
    })))
}
