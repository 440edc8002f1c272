//! # Message Bus Abstraction
//!
//! A platform-level abstraction over the two broker surfaces the command
//! platform talks to:
//!
//! - **Point-to-point queues** ([`CommandQueue`]): command requests and
//!   replies, consumed by exactly one worker per queue group.
//! - **Broadcast events** ([`EventPublisher`]): outcome notifications fanned
//!   out to every interested subscriber, carrying a routing key verbatim.
//!
//! ## Why This Lives in `platform/`
//!
//! The bus is a shared runtime capability: service modules depend on the
//! traits, and the config-driven swap between NATS (production) and InMemory
//! (dev/test) happens at wiring time.
//!
//! ## Implementations
//!
//! - **NatsBus**: production implementation over an `async_nats::Client`
//! - **InMemoryBus**: test/dev implementation over in-memory channels

mod inmemory_bus;
mod nats_bus;

pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Header recognized by adapters as the broker correlation field.
pub const HEADER_CORRELATION_ID: &str = "correlationId";

/// Header recognized by adapters as the broker reply destination.
pub const HEADER_REPLY_TO: &str = "replyTo";

/// Header carrying the routing key of a broadcast event. The key must
/// survive unchanged from publisher to subscriber.
pub const HEADER_ROUTING_KEY: &str = "message-key";

/// A message received from the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The queue or topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Application headers
    pub headers: Option<HashMap<String, String>>,
    /// Reply destination (for request-response patterns)
    pub reply_to: Option<String>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
            reply_to: None,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Look up a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }
}

/// Errors that can occur when using the bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    Publish(String),

    #[error("failed to subscribe to subject: {0}")]
    Subscribe(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Point-to-point queue abstraction for command requests and replies.
///
/// A queue delivers each message to one worker in the queue's consumer
/// group. The `replyTo` header maps onto the broker's reply destination and
/// the `correlationId` header onto its correlation field where the broker
/// has one; all other headers travel as stringly typed application
/// properties.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    /// Send a message to a queue
    async fn send(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> BusResult<()>;

    /// Subscribe to a queue as a member of its consumer group
    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

/// Broadcast event abstraction.
///
/// Events fan out to every subscriber of the topic. `key` is the routing
/// key; adapters must carry it unchanged.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to a topic
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> BusResult<()>;

    /// Subscribe to events matching a topic pattern
    ///
    /// Patterns support NATS-style wildcards: `*` matches a single token,
    /// `>` matches one or more tokens.
    async fn subscribe_events(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandQueue")
    }
}

impl fmt::Debug for dyn EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventPublisher")
    }
}
