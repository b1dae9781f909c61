//! Pub/sub transport abstraction.
//!
//! The coordinator broadcasts eviction events through this seam so that the
//! local tiers of peer processes stay eventually consistent. Any transport
//! with topic-based fan-out can implement it; an in-process implementation
//! for tests lives in [`crate::testing::MemoryBus`].

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A message received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    content: Bytes,
}

impl Message {
    /// Create a message.
    pub fn new(topic: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            content: content.into(),
        }
    }

    /// The topic the message arrived on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The message payload.
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// Topic-based publish/subscribe transport.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload on a topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a set of topics.
    ///
    /// Called at most once per instance by the coordinator. The returned
    /// stream ends when the transport is closed.
    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::UnboundedReceiver<Message>>;

    /// Close the transport, ending any subscription stream.
    ///
    /// Must also handle the case where [`PubSub::subscribe`] was never
    /// called.
    fn close(&self);
}
