//! Reply queue consumer
//!
//! Resolves response-registry slots from replies arriving on the default
//! reply queue. Replies for submitters that named their own reply
//! destination never pass through here; their slots simply time out into
//! the asynchronous path.

use futures::StreamExt;
use message_bus::CommandQueue;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::contracts::headers::{
    HEADER_COMMAND_ID, HEADER_MESSAGE_TYPE, MSG_COMMAND_COMPLETED, MSG_COMMAND_FAILED,
};
use crate::services::response_registry::ResponseRegistry;

pub async fn start_reply_consumer(
    queue: Arc<dyn CommandQueue>,
    registry: ResponseRegistry,
    reply_queue: String,
) {
    tokio::spawn(async move {
        tracing::info!(queue = %reply_queue, "starting reply consumer");

        let mut stream = match queue.subscribe(&reply_queue).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(queue = %reply_queue, error = %e, "failed to subscribe");
                return;
            }
        };

        while let Some(msg) = stream.next().await {
            let command_id = msg
                .header(HEADER_COMMAND_ID)
                .and_then(|raw| Uuid::parse_str(raw).ok());

            let Some(command_id) = command_id else {
                tracing::warn!(queue = %reply_queue, "reply without a command id, dropping");
                continue;
            };

            let payload: JsonValue =
                serde_json::from_slice(&msg.payload).unwrap_or(JsonValue::Null);

            match msg.header(HEADER_MESSAGE_TYPE) {
                Some(MSG_COMMAND_COMPLETED) => registry.complete(command_id, payload),
                Some(MSG_COMMAND_FAILED) => {
                    let error = payload
                        .get("error")
                        .and_then(JsonValue::as_str)
                        .unwrap_or("command failed")
                        .to_string();
                    registry.fail(command_id, error);
                }
                other => tracing::warn!(
                    command_id = %command_id,
                    message_type = other.unwrap_or("none"),
                    "reply with unexpected message type, dropping"
                ),
            }
        }

        tracing::warn!(queue = %reply_queue, "reply consumer stopped");
    });
}
