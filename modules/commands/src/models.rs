use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Command
// ============================================================================

/// Lifecycle state of a command. Terminal states are never mutated by the
/// core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "command_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// A durably recorded business request
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Command {
    pub id: Uuid,
    pub name: String,
    pub business_key: String,
    pub payload: JsonValue,
    pub idempotency_key: String,
    pub status: CommandStatus,
    pub retries: i32,
    pub processing_lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub reply: Option<JsonValue>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Outbox
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    New,
    Claimed,
    Published,
}

/// Which transport an outbox row is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxCategory {
    Command,
    Reply,
    Event,
}

/// A pending outbound dispatch
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxRow {
    pub id: Uuid,
    pub category: OutboxCategory,
    pub topic: String,
    pub key: String,
    pub message_type: String,
    pub payload: JsonValue,
    pub headers: JsonValue,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub next_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxRow {
    /// Headers as a string map for the bus adapters
    pub fn headers_map(&self) -> HashMap<String, String> {
        match self.headers.as_object() {
            Some(map) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            None => HashMap::new(),
        }
    }
}

/// Input shape for an outbox insert, produced by the row factory
#[derive(Debug, Clone)]
pub struct NewOutboxRow {
    pub id: Uuid,
    pub category: OutboxCategory,
    pub topic: String,
    pub key: String,
    pub message_type: String,
    pub payload: JsonValue,
    pub headers: HashMap<String, String>,
}

// ============================================================================
// HTTP shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Body of the 202 response when the reply did not arrive within the
/// synchronous wait window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAccepted {
    pub status: String,
    pub command_id: Uuid,
}

impl CommandAccepted {
    pub fn new(command_id: Uuid) -> Self {
        Self {
            status: "accepted".to_string(),
            command_id,
        }
    }
}
