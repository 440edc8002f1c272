//! Command ingest endpoint
//!
//! `POST /commands/{name}` with a JSON body. `Idempotency-Key` is required;
//! `Reply-To` and `Business-Key` are optional. The response always carries
//! `X-Command-Id` and `X-Correlation-Id`; the status code says how far the
//! command got within the synchronous wait window.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use message_bus::HEADER_REPLY_TO;

use crate::models::{CommandAccepted, ErrorResponse};
use crate::services::command_bus::{CommandBus, CommandBusError};
use crate::services::response_registry::{ReplyOutcome, ResponseRegistry};

#[derive(Clone)]
pub struct AppState {
    pub command_bus: Arc<CommandBus>,
    pub registry: ResponseRegistry,
    pub sync_wait: Duration,
    pub default_reply_queue: String,
}

pub fn commands_router(state: AppState) -> Router {
    Router::new()
        .route("/commands/{name}", post(submit_command))
        .with_state(state)
}

/// POST /commands/{name} - accept a business command
async fn submit_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let idempotency_key = match header_value(&headers, "Idempotency-Key") {
        Some(key) => key,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "missing_idempotency_key",
                    "Idempotency-Key header is required",
                )),
            ))
        }
    };

    // The business key defaults to the idempotency key, so every logical
    // submission satisfies the (name, business_key) uniqueness on its own.
    let business_key =
        header_value(&headers, "Business-Key").unwrap_or_else(|| idempotency_key.clone());

    let reply_to =
        header_value(&headers, "Reply-To").unwrap_or_else(|| state.default_reply_queue.clone());

    let mut reply_meta = HashMap::new();
    reply_meta.insert(HEADER_REPLY_TO.to_string(), reply_to);

    let command_id = state
        .command_bus
        .accept(&name, &idempotency_key, &business_key, payload, &reply_meta)
        .await
        .map_err(|e| match e {
            CommandBusError::DuplicateIdempotency => (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new("duplicate_idempotency_key", e.to_string())),
            ),
            CommandBusError::DuplicateBusiness => (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new("duplicate_business_key", e.to_string())),
            ),
            CommandBusError::Database(e) => {
                tracing::error!(error = %e, "failed to accept command");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("database_error", "failed to accept command")),
                )
            }
        })?;

    if state.sync_wait.is_zero() {
        return Ok(accepted_response(command_id));
    }

    let receiver = state.registry.register(command_id);

    match tokio::time::timeout(state.sync_wait, receiver).await {
        Ok(Ok(ReplyOutcome::Completed(reply))) => {
            Ok((StatusCode::OK, id_headers(command_id), Json(reply)).into_response())
        }
        Ok(Ok(ReplyOutcome::Failed(error))) => Ok((
            StatusCode::OK,
            id_headers(command_id),
            Json(json!({ "error": error })),
        )
            .into_response()),
        // Slot reaped or wait elapsed: the command still completes in the
        // background.
        Ok(Err(_)) | Err(_) => Ok(accepted_response(command_id)),
    }
}

fn accepted_response(command_id: Uuid) -> Response {
    (
        StatusCode::ACCEPTED,
        id_headers(command_id),
        Json(CommandAccepted::new(command_id)),
    )
        .into_response()
}

fn id_headers(command_id: Uuid) -> [(&'static str, String); 2] {
    [
        ("x-command-id", command_id.to_string()),
        // The correlation id of the whole exchange is the command id.
        ("x-correlation-id", command_id.to_string()),
    ]
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
