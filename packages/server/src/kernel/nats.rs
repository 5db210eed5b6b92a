//! NATS client abstraction for production and testing.
//!
//! Provides a trait-based publisher that allows swapping between real NATS
//! connections and a recording test double.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::RwLock;

/// A published message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Trait for NATS publish operations.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish a message to a subject. Fire-and-forget, at-most-once.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// Real NATS client publisher.
pub struct NatsClientPublisher {
    client: async_nats::Client,
}

impl NatsClientPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BusPublisher for NatsClientPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }
}

/// Mock publisher that records published messages for assertions.
///
/// Lets tests inspect what would have gone over the wire without a broker.
#[derive(Default)]
pub struct TestBus {
    published: RwLock<Vec<PublishedMessage>>,
}

impl TestBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All published messages, in publish order.
    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Messages published to a specific subject.
    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Count of published messages.
    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deserialize a published payload as JSON.
    pub fn deserialize_message<T: serde::de::DeserializeOwned>(
        &self,
        msg: &PublishedMessage,
    ) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&msg.payload)
    }

    /// Clear all recorded messages.
    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl BusPublisher for TestBus {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
        Ok(())
    }
}
