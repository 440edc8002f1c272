//! Inbound command message envelope
//!
//! The wire format keeps the payload opaque; everything the executor needs
//! to route and correlate travels in headers.

use message_bus::{BusMessage, HEADER_CORRELATION_ID, HEADER_REPLY_TO};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

use super::headers::{
    HEADER_BUSINESS_KEY, HEADER_COMMAND_ID, HEADER_COMMAND_NAME, HEADER_MESSAGE_ID,
};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    #[error("header {0} is not a valid uuid")]
    InvalidUuid(&'static str),

    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// The parsed shape of an inbound command message
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub message_id: Uuid,
    pub name: String,
    pub command_id: Uuid,
    pub correlation_id: Option<String>,
    /// Routing key of the originating command (its business key)
    pub key: String,
    pub reply_to: Option<String>,
    pub headers: HashMap<String, String>,
    pub payload: JsonValue,
}

impl MessageEnvelope {
    /// Parse an envelope out of a bus message's headers and payload
    pub fn from_bus_message(msg: &BusMessage) -> Result<Self, EnvelopeError> {
        let headers = msg.headers.clone().unwrap_or_default();

        let message_id = require_uuid(&headers, HEADER_MESSAGE_ID)?;
        let command_id = require_uuid(&headers, HEADER_COMMAND_ID)?;
        let name = headers
            .get(HEADER_COMMAND_NAME)
            .ok_or(EnvelopeError::MissingHeader(HEADER_COMMAND_NAME))?
            .clone();
        let key = headers
            .get(HEADER_BUSINESS_KEY)
            .ok_or(EnvelopeError::MissingHeader(HEADER_BUSINESS_KEY))?
            .clone();

        let correlation_id = headers.get(HEADER_CORRELATION_ID).cloned();
        // Adapters map the replyTo header onto the broker's native reply
        // field; accept either spelling.
        let reply_to = msg
            .reply_to
            .clone()
            .or_else(|| headers.get(HEADER_REPLY_TO).cloned());

        let payload: JsonValue = serde_json::from_slice(&msg.payload)?;

        Ok(Self {
            message_id,
            name,
            command_id,
            correlation_id,
            key,
            reply_to,
            headers,
            payload,
        })
    }
}

fn require_uuid(
    headers: &HashMap<String, String>,
    name: &'static str,
) -> Result<Uuid, EnvelopeError> {
    let raw = headers
        .get(name)
        .ok_or(EnvelopeError::MissingHeader(name))?;
    Uuid::parse_str(raw).map_err(|_| EnvelopeError::InvalidUuid(name))
}
