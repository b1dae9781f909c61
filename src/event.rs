//! Eviction events and the message broker.
//!
//! The broker stamps outgoing events with the owning factory's id so that
//! listeners can drop events that originated in their own process, and runs
//! a single consumer task over the subscription stream.

use crate::error::{Error, Result};
use crate::key;
use crate::pubsub::PubSub;
use crate::types::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Events exchanged between peer processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EventType {
    /// Default, never published.
    None,
    /// Peers should drop their local copies of the carried keys.
    Evict,
}

/// Event types a listener may subscribe to. `None` is not registered.
const REGISTERED_TYPES: &[EventType] = &[EventType::Evict];

impl EventType {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            EventType::None => "None",
            EventType::Evict => "Evict",
        }
    }

    /// Topic this event is published on, e.g. `ca#tp#Evict`.
    pub(crate) fn topic(&self) -> String {
        key::topic_key(self.name())
    }

    fn from_topic(topic: &str) -> Option<EventType> {
        REGISTERED_TYPES.iter().copied().find(|t| t.topic() == topic)
    }
}

/// Wire body of an event: the originating factory and the affected keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct EventBody {
    #[serde(rename = "factoryId")]
    pub factory_id: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Event {
    pub event_type: EventType,
    pub body: EventBody,
}

impl Event {
    pub(crate) fn evict(keys: Vec<String>) -> Self {
        Self {
            event_type: EventType::Evict,
            body: EventBody {
                factory_id: String::new(),
                keys,
            },
        }
    }
}

/// Callback invoked by the broker's consumer task for every delivery.
///
/// `Err(Error::SelfEvent)` marks an event that originated in this process;
/// by convention the handler performs no work for it.
pub(crate) type EventHandler =
    Arc<dyn Fn(std::result::Result<Event, Error>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Bridges the coordinator and the pub/sub transport.
pub(crate) struct MessageBroker {
    factory_id: String,
    pubsub: Option<Arc<dyn PubSub>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MessageBroker {
    pub(crate) fn new(factory_id: String, pubsub: Option<Arc<dyn PubSub>>) -> Self {
        Self {
            factory_id,
            pubsub,
            listener: Mutex::new(None),
        }
    }

    /// Whether a transport is attached. Without one, `send` and `listen`
    /// are no-ops.
    pub(crate) fn registered(&self) -> bool {
        self.pubsub.is_some()
    }

    /// Stamp the event with this factory's id and publish it.
    pub(crate) async fn send(&self, event: Event) -> Result<()> {
        let Some(pubsub) = &self.pubsub else {
            return Ok(());
        };

        let mut body = event.body;
        body.factory_id = self.factory_id.clone();

        let payload = serde_json::to_vec(&body).map_err(|e| Error::Encode(e.to_string()))?;

        debug!(
            topic = %event.event_type.topic(),
            keys = body.keys.len(),
            "publishing event"
        );
        pubsub.publish(&event.event_type.topic(), payload.into()).await
    }

    /// Subscribe to the topics of `types` and run a consumer task that
    /// classifies each delivery and hands it to `handler`.
    pub(crate) async fn listen(&self, types: &[EventType], handler: EventHandler) -> Result<()> {
        if types.is_empty() {
            return Err(Error::NoEventType);
        }

        let Some(pubsub) = &self.pubsub else {
            return Ok(());
        };

        let topics: Vec<String> = types.iter().map(EventType::topic).collect();
        let mut stream = pubsub.subscribe(&topics).await?;

        let factory_id = self.factory_id.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = stream.recv().await {
                let Some(event_type) = EventType::from_topic(message.topic()) else {
                    handler(Err(Error::UnknownTopic(message.topic().to_string()))).await;
                    continue;
                };

                let body: EventBody = match serde_json::from_slice(message.content()) {
                    Ok(body) => body,
                    Err(e) => {
                        handler(Err(Error::Decode(e.to_string()))).await;
                        continue;
                    }
                };

                if body.factory_id == factory_id {
                    handler(Err(Error::SelfEvent)).await;
                    continue;
                }

                handler(Ok(Event { event_type, body })).await;
            }

            debug!("event consumer stream ended");
        });

        *self.listener.lock() = Some(handle);
        Ok(())
    }

    /// Close the transport and wait for the consumer task to drain.
    /// Idempotent.
    pub(crate) async fn close(&self) {
        if let Some(pubsub) = &self.pubsub {
            pubsub.close();
        }

        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "event consumer task failed");
            }
        }
    }
}
