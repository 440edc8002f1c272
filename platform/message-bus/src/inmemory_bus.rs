//! In-memory implementation of the bus traits for testing and development

use crate::{
    BusMessage, BusResult, CommandQueue, EventPublisher, HEADER_REPLY_TO, HEADER_ROUTING_KEY,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Bus implementation over in-memory channels
///
/// Suitable for unit tests, local development without Docker, and
/// integration tests that need a fast, isolated bus. Queues and topics
/// share one broadcast channel; subscribers filter by subject pattern.
///
/// # Example
/// ```rust
/// use message_bus::{CommandQueue, InMemoryBus};
/// use futures::StreamExt;
/// use std::collections::HashMap;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// let mut stream = bus.subscribe("APP.CMD.CreateUser.Q").await?;
/// bus.send("APP.CMD.CreateUser.Q", b"{}".to_vec(), &HashMap::new()).await?;
///
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.subject, "APP.CMD.CreateUser.Q");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    // One broadcast channel for all messages; a large buffer avoids
    // dropping messages under test bursts.
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    /// Create a new in-memory bus with a buffer of 1000 messages
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create a new in-memory bus with a custom buffer size
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Does a concrete subject fall under a subscription pattern?
    ///
    /// NATS wildcard rules: `*` stands in for one dot-separated token,
    /// `>` for one or more trailing tokens. Both sides are walked in
    /// lockstep; a `>` needs at least one subject token left under it.
    fn subject_matches(subject: &str, pattern: &str) -> bool {
        let mut subject_tokens = subject.split('.');
        let mut pattern_tokens = pattern.split('.');

        loop {
            match (pattern_tokens.next(), subject_tokens.next()) {
                (Some(">"), Some(_)) => return true,
                (Some("*"), Some(_)) => {}
                (Some(want), Some(got)) if want == got => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    fn subscribe_pattern(&self, pattern: &str) -> BoxStream<'static, BusMessage> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::subject_matches(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        };

        stream.boxed()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandQueue for InMemoryBus {
    async fn send(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> BusResult<()> {
        let mut headers = headers.clone();
        let reply_to = headers.remove(HEADER_REPLY_TO);

        let mut msg = BusMessage::new(queue.to_string(), body).with_headers(headers);
        if let Some(reply) = reply_to {
            msg = msg.with_reply_to(reply);
        }

        // Ignore the send error when there are no receivers
        let _ = self.sender.send(msg);

        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        Ok(self.subscribe_pattern(queue))
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> BusResult<()> {
        let mut headers = headers.clone();
        headers.insert(HEADER_ROUTING_KEY.to_string(), key.to_string());

        let msg = BusMessage::new(topic.to_string(), value).with_headers(headers);
        let _ = self.sender.send(msg);

        Ok(())
    }

    async fn subscribe_events(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        Ok(self.subscribe_pattern(pattern))
    }
}
