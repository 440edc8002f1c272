//! Response registry
//!
//! Short-lived map from command id to a one-shot completion slot, used to
//! turn the asynchronous reply into a bounded synchronous HTTP response.
//! Purely an optimization: a lost slot degrades the caller to the
//! asynchronous 202 path, never to incorrectness. Slots self-remove after
//! the TTL whether or not a completer arrives, so the map is bounded by
//! in-flight requests.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// What the reply consumer resolved a slot with
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Completed(JsonValue),
    Failed(String),
}

#[derive(Clone)]
pub struct ResponseRegistry {
    slots: Arc<Mutex<HashMap<Uuid, oneshot::Sender<ReplyOutcome>>>>,
    ttl: Duration,
}

impl ResponseRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Insert a slot for a command and schedule its self-removal.
    ///
    /// The receiver resolves with the reply outcome, or errors when the TTL
    /// reaps the slot first.
    pub fn register(&self, command_id: Uuid) -> oneshot::Receiver<ReplyOutcome> {
        let (sender, receiver) = oneshot::channel();

        self.slots
            .lock()
            .expect("response registry lock poisoned")
            .insert(command_id, sender);

        let slots = self.slots.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            // Dropping the sender wakes the waiter with a recv error.
            slots
                .lock()
                .expect("response registry lock poisoned")
                .remove(&command_id);
        });

        receiver
    }

    pub fn complete(&self, command_id: Uuid, payload: JsonValue) {
        self.resolve(command_id, ReplyOutcome::Completed(payload));
    }

    pub fn fail(&self, command_id: Uuid, error: String) {
        self.resolve(command_id, ReplyOutcome::Failed(error));
    }

    fn resolve(&self, command_id: Uuid, outcome: ReplyOutcome) {
        let sender = self
            .slots
            .lock()
            .expect("response registry lock poisoned")
            .remove(&command_id);

        match sender {
            // The waiter may have given up; a dead receiver is fine.
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => tracing::debug!(
                command_id = %command_id,
                "no response slot for reply, submitter already moved on"
            ),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .expect("response registry lock poisoned")
            .len()
    }
}
