//! Outbox row factory
//!
//! Pure constructors shaping an outbox row per category. The naming
//! convention is applied here and nowhere else on the produce side; the
//! fresh row id is also stamped into the `message-id` header so replays of
//! the same row dedup downstream.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::Naming;
use crate::models::{NewOutboxRow, OutboxCategory};

use super::envelope::MessageEnvelope;
use super::headers::{
    HEADER_BUSINESS_KEY, HEADER_COMMAND_ID, HEADER_COMMAND_NAME, HEADER_MESSAGE_ID,
    HEADER_MESSAGE_TYPE, MSG_COMMAND_REQUESTED,
};
use message_bus::{HEADER_CORRELATION_ID, HEADER_REPLY_TO};

/// Outbound request to the command queue of `name`.
///
/// `reply_meta` is the submitter's reply metadata (reply destination,
/// correlation overrides); its entries are merged under the command
/// identity headers.
pub fn command_requested(
    naming: &Naming,
    name: &str,
    command_id: Uuid,
    business_key: &str,
    payload: JsonValue,
    reply_meta: &HashMap<String, String>,
) -> NewOutboxRow {
    let id = Uuid::new_v4();

    let mut headers = reply_meta.clone();
    headers.insert(HEADER_MESSAGE_ID.to_string(), id.to_string());
    headers.insert(HEADER_COMMAND_ID.to_string(), command_id.to_string());
    headers.insert(HEADER_COMMAND_NAME.to_string(), name.to_string());
    headers.insert(HEADER_BUSINESS_KEY.to_string(), business_key.to_string());
    headers.insert(
        HEADER_MESSAGE_TYPE.to_string(),
        MSG_COMMAND_REQUESTED.to_string(),
    );
    headers
        .entry(HEADER_CORRELATION_ID.to_string())
        .or_insert_with(|| command_id.to_string());

    NewOutboxRow {
        id,
        category: OutboxCategory::Command,
        topic: naming.command_queue(name),
        key: business_key.to_string(),
        message_type: MSG_COMMAND_REQUESTED.to_string(),
        payload,
        headers,
    }
}

/// Point-to-point reply to the envelope's reply destination (default reply
/// queue when the submitter named none). Headers inherit the envelope's,
/// with a fresh message id and a guaranteed correlation id.
pub fn reply(
    naming: &Naming,
    envelope: &MessageEnvelope,
    message_type: &str,
    payload: JsonValue,
) -> NewOutboxRow {
    let id = Uuid::new_v4();

    let topic = envelope
        .reply_to
        .clone()
        .unwrap_or_else(|| naming.reply_queue().to_string());

    let mut headers = envelope.headers.clone();
    // The reply's own destination is this row's topic, not a header.
    headers.remove(HEADER_REPLY_TO);
    headers.insert(HEADER_MESSAGE_ID.to_string(), id.to_string());
    headers.insert(HEADER_MESSAGE_TYPE.to_string(), message_type.to_string());
    headers
        .entry(HEADER_CORRELATION_ID.to_string())
        .or_insert_with(|| envelope.command_id.to_string());

    NewOutboxRow {
        id,
        category: OutboxCategory::Reply,
        topic,
        key: envelope.key.clone(),
        message_type: message_type.to_string(),
        payload,
        headers,
    }
}

/// Broadcast event. The routing key is preserved verbatim by the bus
/// adapter; the only headers are the message identity and type.
pub fn event(topic: String, key: &str, message_type: &str, payload: JsonValue) -> NewOutboxRow {
    let id = Uuid::new_v4();

    let mut headers = HashMap::new();
    headers.insert(HEADER_MESSAGE_ID.to_string(), id.to_string());
    headers.insert(HEADER_MESSAGE_TYPE.to_string(), message_type.to_string());

    NewOutboxRow {
        id,
        category: OutboxCategory::Event,
        topic,
        key: key.to_string(),
        message_type: message_type.to_string(),
        payload,
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::headers::MSG_COMMAND_COMPLETED;
    use serde_json::json;

    #[test]
    fn command_row_carries_identity_headers() {
        let naming = Naming::default();
        let command_id = Uuid::new_v4();

        let mut reply_meta = HashMap::new();
        reply_meta.insert(HEADER_REPLY_TO.to_string(), "APP.CMD.REPLY.Q".to_string());

        let row = command_requested(
            &naming,
            "CreateUser",
            command_id,
            "user-42",
            json!({"username": "alice"}),
            &reply_meta,
        );

        assert_eq!(row.category, OutboxCategory::Command);
        assert_eq!(row.topic, "APP.CMD.CreateUser.Q");
        assert_eq!(row.key, "user-42");
        assert_eq!(row.message_type, MSG_COMMAND_REQUESTED);
        assert_eq!(row.headers[HEADER_COMMAND_ID], command_id.to_string());
        assert_eq!(row.headers[HEADER_COMMAND_NAME], "CreateUser");
        assert_eq!(row.headers[HEADER_BUSINESS_KEY], "user-42");
        assert_eq!(row.headers[HEADER_REPLY_TO], "APP.CMD.REPLY.Q");
        assert_eq!(row.headers[HEADER_MESSAGE_ID], row.id.to_string());
        assert_eq!(row.headers[HEADER_CORRELATION_ID], command_id.to_string());
    }

    fn envelope_with_reply_to(reply_to: Option<&str>) -> MessageEnvelope {
        let command_id = Uuid::new_v4();
        let mut headers = HashMap::new();
        headers.insert(HEADER_COMMAND_ID.to_string(), command_id.to_string());
        headers.insert(HEADER_COMMAND_NAME.to_string(), "CreateUser".to_string());

        MessageEnvelope {
            message_id: Uuid::new_v4(),
            name: "CreateUser".to_string(),
            command_id,
            correlation_id: None,
            key: "user-42".to_string(),
            reply_to: reply_to.map(str::to_string),
            headers,
            payload: json!({}),
        }
    }

    #[test]
    fn reply_row_targets_the_envelope_reply_destination() {
        let naming = Naming::default();
        let envelope = envelope_with_reply_to(Some("callers.replies"));

        let row = reply(&naming, &envelope, MSG_COMMAND_COMPLETED, json!({"ok": true}));

        assert_eq!(row.category, OutboxCategory::Reply);
        assert_eq!(row.topic, "callers.replies");
        assert_eq!(row.headers[HEADER_MESSAGE_TYPE], MSG_COMMAND_COMPLETED);
        assert_eq!(
            row.headers[HEADER_CORRELATION_ID],
            envelope.command_id.to_string()
        );
    }

    #[test]
    fn reply_row_falls_back_to_the_default_reply_queue() {
        let naming = Naming::default();
        let envelope = envelope_with_reply_to(None);

        let row = reply(&naming, &envelope, MSG_COMMAND_COMPLETED, json!({}));

        assert_eq!(row.topic, "APP.CMD.REPLY.Q");
    }

    #[test]
    fn event_row_preserves_the_routing_key() {
        let row = event(
            "events.CreateUser".to_string(),
            "user-42",
            MSG_COMMAND_COMPLETED,
            json!({"ok": true}),
        );

        assert_eq!(row.category, OutboxCategory::Event);
        assert_eq!(row.key, "user-42");
        assert_eq!(row.headers.len(), 2);
        assert_eq!(row.headers[HEADER_MESSAGE_ID], row.id.to_string());
    }
}
