//! NATS-based implementation of the bus traits

use crate::{
    BusError, BusMessage, BusResult, CommandQueue, EventPublisher, HEADER_REPLY_TO,
    HEADER_ROUTING_KEY,
};
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;

/// Production bus over a NATS client.
///
/// Queues are NATS subjects consumed through a queue group named after the
/// queue, so competing workers split the messages. The `replyTo` header is
/// mapped onto the NATS reply subject; everything else travels as NATS
/// headers.
///
/// # Example
/// ```rust,no_run
/// use message_bus::{CommandQueue, NatsBus};
/// use std::collections::HashMap;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(client);
/// bus.send("APP.CMD.CreateUser.Q", b"{}".to_vec(), &HashMap::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn to_nats_headers(headers: &HashMap<String, String>) -> async_nats::HeaderMap {
        let mut nats_headers = async_nats::HeaderMap::new();
        for (name, value) in headers {
            nats_headers.insert(name.as_str(), value.as_str());
        }
        nats_headers
    }

    fn from_nats_message(nats_msg: async_nats::Message) -> BusMessage {
        let mut msg = BusMessage::new(nats_msg.subject.to_string(), nats_msg.payload.to_vec());

        if let Some(reply) = nats_msg.reply {
            msg = msg.with_reply_to(reply.to_string());
        }

        if let Some(nats_headers) = nats_msg.headers {
            let mut headers = HashMap::new();
            for (key, values) in nats_headers.iter() {
                // Take the first value for each header
                if let Some(value) = values.first() {
                    headers.insert(key.to_string(), value.to_string());
                }
            }
            if !headers.is_empty() {
                msg = msg.with_headers(headers);
            }
        }

        msg
    }
}

#[async_trait]
impl CommandQueue for NatsBus {
    async fn send(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> BusResult<()> {
        let mut headers = headers.clone();
        let reply_to = headers.remove(HEADER_REPLY_TO);
        let nats_headers = Self::to_nats_headers(&headers);

        let result = match reply_to {
            Some(reply) => {
                self.client
                    .publish_with_reply_and_headers(
                        queue.to_string(),
                        reply,
                        nats_headers,
                        body.into(),
                    )
                    .await
            }
            None => {
                self.client
                    .publish_with_headers(queue.to_string(), nats_headers, body.into())
                    .await
            }
        };

        result.map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .queue_subscribe(queue.to_string(), queue.to_string())
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        Ok(subscriber.map(Self::from_nats_message).boxed())
    }
}

#[async_trait]
impl EventPublisher for NatsBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> BusResult<()> {
        let mut headers = headers.clone();
        headers.insert(HEADER_ROUTING_KEY.to_string(), key.to_string());
        let nats_headers = Self::to_nats_headers(&headers);

        self.client
            .publish_with_headers(topic.to_string(), nats_headers, value.into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn subscribe_events(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(pattern.to_string())
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        Ok(subscriber.map(Self::from_nats_message).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running NATS server.
    // For manual testing: docker run -p 4222:4222 nats:2.10-alpine

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_queue_send_and_subscribe() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let bus = NatsBus::new(client);

        let mut stream = bus.subscribe("test.nats.queue").await.unwrap();

        let mut headers = HashMap::new();
        headers.insert(HEADER_REPLY_TO.to_string(), "test.nats.reply".to_string());
        headers.insert("command-id".to_string(), "cmd-1".to_string());

        bus.send("test.nats.queue", b"hello".to_vec(), &headers)
            .await
            .unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(msg.subject, "test.nats.queue");
        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.reply_to.as_deref(), Some("test.nats.reply"));
        assert_eq!(msg.header("command-id"), Some("cmd-1"));
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_event_key_survives() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let bus = NatsBus::new(client);

        let mut stream = bus.subscribe_events("test.nats.events.>").await.unwrap();

        bus.publish(
            "test.nats.events.created",
            "key-42",
            b"{}".to_vec(),
            &HashMap::new(),
        )
        .await
        .unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(msg.header(HEADER_ROUTING_KEY), Some("key-42"));
    }
}
