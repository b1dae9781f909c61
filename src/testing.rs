//! In-process test doubles.
//!
//! Production deployments pair the coordinator with a networked shared tier
//! and its pub/sub channel. These doubles stand in for both so the full
//! read/write/evict loop can run hermetically inside one process:
//!
//! - [`MemoryBus`]: a pub/sub hub handing out per-factory endpoints.
//!   Publishes fan out to every matching subscriber *including the
//!   publisher's own endpoint*, so self-event suppression is exercised the
//!   same way a real broker would.
//! - [`HashTier`]: a hashmap-backed tier that accepts and ignores TTLs.
//! - [`FailTier`]: a tier whose every operation fails, for error-path tests.
//! - [`wait_for`]: polling helper for eventually-consistent assertions.

use crate::error::{Error, Result};
use crate::pubsub::{Message, PubSub};
use crate::tier::{MSetHooks, Tier};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

struct Subscriber {
    endpoint_id: u64,
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<Message>,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_endpoint_id: AtomicU64,
}

/// In-process pub/sub hub.
///
/// Hand each factory its own [`MemoryBus::endpoint`]; everything published
/// through any endpoint is delivered to every subscribed endpoint on the
/// hub.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_endpoint_id: AtomicU64::new(0),
            }),
        }
    }

    /// Create a transport endpoint bound to this hub.
    pub fn endpoint(&self) -> Arc<BusEndpoint> {
        Arc::new(BusEndpoint {
            id: self.inner.next_endpoint_id.fetch_add(1, Ordering::SeqCst),
            inner: self.inner.clone(),
        })
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One transport connection on a [`MemoryBus`].
pub struct BusEndpoint {
    id: u64,
    inner: Arc<BusInner>,
}

#[async_trait]
impl PubSub for BusEndpoint {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let subscribers = self.inner.subscribers.lock();
        for subscriber in subscribers.iter() {
            if subscriber.topics.iter().any(|t| t == topic) {
                let _ = subscriber.tx.send(Message::new(topic, payload.clone()));
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::UnboundedReceiver<Message>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(Subscriber {
            endpoint_id: self.id,
            topics: topics.to_vec(),
            tx,
        });

        Ok(rx)
    }

    fn close(&self) {
        // Dropping the senders ends this endpoint's subscription streams.
        self.inner
            .subscribers
            .lock()
            .retain(|s| s.endpoint_id != self.id);
    }
}

/// Hashmap-backed tier.
///
/// TTLs are accepted and ignored; entries live until deleted. Plays the
/// shared-tier role in tests, so `mset` cost hooks are not fired (those
/// belong to the in-memory tier).
#[derive(Default)]
pub struct HashTier {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl HashTier {
    /// Create an empty tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a stored payload directly.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.entries.lock().get(key).cloned()
    }

    /// Store a payload directly, bypassing the coordinator.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>) {
        self.entries.lock().insert(key.into(), bytes.into());
    }

    /// Whether the tier holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl Tier for HashTier {
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let entries = self.entries.lock();
        Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
    }

    async fn mset(
        &self,
        entries: &HashMap<String, Bytes>,
        _ttl: Duration,
        _hooks: &MSetHooks,
    ) -> Result<()> {
        let mut stored = self.entries.lock();
        for (key, bytes) in entries {
            stored.insert(key.clone(), bytes.clone());
        }

        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        let mut stored = self.entries.lock();
        for key in keys {
            stored.remove(key);
        }

        Ok(())
    }
}

/// Tier whose every operation fails at the transport level.
#[derive(Debug, Default)]
pub struct FailTier;

impl FailTier {
    /// Create a failing tier.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tier for FailTier {
    async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        Err(Error::Transport("tier down".into()))
    }

    async fn mset(
        &self,
        _entries: &HashMap<String, Bytes>,
        _ttl: Duration,
        _hooks: &MSetHooks,
    ) -> Result<()> {
        Err(Error::Transport("tier down".into()))
    }

    async fn del(&self, _keys: &[String]) -> Result<()> {
        Err(Error::Transport("tier down".into()))
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_delivers_to_all_subscribers_including_publisher() {
        let bus = MemoryBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();

        let topics = vec!["t1".to_string()];
        let mut rx_a = a.subscribe(&topics).await.unwrap();
        let mut rx_b = b.subscribe(&topics).await.unwrap();

        a.publish("t1", Bytes::from_static(b"payload")).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap().content(), b"payload");
        assert_eq!(rx_b.recv().await.unwrap().content(), b"payload");
    }

    #[tokio::test]
    async fn test_bus_filters_by_topic() {
        let bus = MemoryBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();

        let mut rx = b.subscribe(&["wanted".to_string()]).await.unwrap();

        a.publish("other", Bytes::from_static(b"x")).await.unwrap();
        a.publish("wanted", Bytes::from_static(b"y")).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic(), "wanted");
        assert_eq!(message.content(), b"y");
    }

    #[tokio::test]
    async fn test_close_ends_subscription_stream() {
        let bus = MemoryBus::new();
        let a = bus.endpoint();

        let mut rx = a.subscribe(&["t".to_string()]).await.unwrap();
        a.close();

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_without_subscribe_is_safe() {
        let bus = MemoryBus::new();
        let a = bus.endpoint();
        a.close();
    }

    #[tokio::test]
    async fn test_hash_tier_round_trip() {
        let tier = HashTier::new();

        let mut entries = HashMap::new();
        entries.insert("k1".to_string(), Bytes::from_static(b"v1"));
        tier.mset(&entries, Duration::from_secs(1), &MSetHooks::none())
            .await
            .unwrap();

        let keys = vec!["k1".to_string(), "k2".to_string()];
        let vals = tier.mget(&keys).await.unwrap();
        assert_eq!(vals[0].as_deref(), Some(b"v1".as_ref()));
        assert_eq!(vals[1], None);

        tier.del(&keys).await.unwrap();
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        assert!(!wait_for(|| false, Duration::from_millis(50)).await);
        assert!(wait_for(|| true, Duration::from_millis(50)).await);
    }
}
