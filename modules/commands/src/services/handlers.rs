//! Handler contract and registry
//!
//! Handlers are a table from command name to a capability value, populated
//! at startup. Failures form a closed set of three kinds; the executor
//! branches on the kind, never on error types.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// The three failure kinds a handler may raise
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerFailure {
    /// Business invariant violated; do not retry
    #[error("{0}")]
    Permanent(String),

    /// Business-level retry allowed
    #[error("{0}")]
    RetryableBusiness(String),

    /// Infrastructure-level retry
    #[error("{0}")]
    Transient(String),
}

/// A command handler. Non-failure return values are opaque JSON.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn invoke(&self, name: &str, payload: &JsonValue) -> Result<JsonValue, HandlerFailure>;
}

/// Command name → handler table
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered command names, one consumer subscription each
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

/// Sample handler for the CreateUser command.
///
/// Recognizes the failure-injection flags used by the end-to-end suite:
/// `failPermanent` raises a Permanent invariant violation, `failTransient`
/// a Transient infrastructure error, `failRetryable` a business-level
/// retryable error.
pub struct CreateUserHandler;

#[async_trait]
impl CommandHandler for CreateUserHandler {
    async fn invoke(&self, _name: &str, payload: &JsonValue) -> Result<JsonValue, HandlerFailure> {
        if payload["failPermanent"] == json!(true) {
            return Err(HandlerFailure::Permanent("Invariant broken".to_string()));
        }
        if payload["failTransient"] == json!(true) {
            return Err(HandlerFailure::Transient(
                "simulated infrastructure outage".to_string(),
            ));
        }
        if payload["failRetryable"] == json!(true) {
            return Err(HandlerFailure::RetryableBusiness(
                "resource busy, retry later".to_string(),
            ));
        }

        Ok(json!({
            "created": true,
            "username": payload.get("username").cloned().unwrap_or(JsonValue::Null),
        }))
    }
}
