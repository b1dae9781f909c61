//! Factory and lifecycle.
//!
//! The factory composes the tiers, the codec, the message broker, and the
//! observation callbacks, starts the eviction listener, and owns shutdown.
//! Prefix uniqueness is enforced process-wide so two subsystems cannot
//! silently collide in the shared key space.

use crate::cache::{Cache, PrefixRuntime};
use crate::codec::Codec;
use crate::config::{FactoryConfig, PrefixConfig, TierKind};
use crate::error::{Error, Result};
use crate::event::{EventHandler, EventType, MessageBroker};
use crate::key;
use crate::tier::{CostFn, MSetHooks, Tier};
use crate::types::KeyCountFn;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Prefixes registered by any factory in this process.
static USED_PREFIXES: Lazy<Arc<Mutex<HashSet<String>>>> =
    Lazy::new(|| Arc::new(Mutex::new(HashSet::new())));

/// Empty the process-wide prefix registry.
///
/// Test-only hook: lets a test suite register the same prefixes again after
/// tearing a factory down.
pub fn clear_prefixes() {
    USED_PREFIXES.lock().clear();
}

/// Builds [`Cache`] handles over a fixed pair of tiers and owns the
/// cross-process eviction listener.
pub struct Factory {
    id: String,
    shared_tier: Option<Arc<dyn Tier>>,
    local_tier: Option<Arc<dyn Tier>>,
    broker: Arc<MessageBroker>,
    codec: Codec,
    on_hit: Option<KeyCountFn>,
    on_miss: Option<KeyCountFn>,
    local_hooks: MSetHooks,
    registry: Arc<Mutex<HashSet<String>>>,
    closed: AtomicBool,
}

/// Adapt a `(prefix, key, cost)` callback to the tier-level
/// `(full_key, cost)` shape by splitting the fully-qualified key.
fn split_cost_fn(f: KeyCountFn) -> CostFn {
    Arc::new(move |full_key, cost| {
        let (prefix, user_key) = key::split_prefix_key(full_key);
        f(prefix, user_key, cost);
    })
}

impl Factory {
    /// Create a factory and, when a pub/sub transport and a local tier are
    /// both present, start the eviction listener.
    pub async fn new(config: FactoryConfig) -> Result<Self> {
        Self::with_registry(config, USED_PREFIXES.clone()).await
    }

    pub(crate) async fn with_registry(
        config: FactoryConfig,
        registry: Arc<Mutex<HashSet<String>>>,
    ) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let broker = Arc::new(MessageBroker::new(id.clone(), config.pubsub.clone()));

        // Eviction events only matter to a process that holds local copies.
        if broker.registered() {
            if let Some(local) = &config.local_tier {
                broker
                    .listen(&[EventType::Evict], Self::evict_handler(local.clone()))
                    .await?;
            }
        }

        info!(
            factory_id = %id,
            pubsub = broker.registered(),
            shared = config.shared_tier.is_some(),
            local = config.local_tier.is_some(),
            "cache factory started"
        );

        let local_hooks = MSetHooks {
            on_cost_add: config.on_local_cost_add.map(split_cost_fn),
            on_cost_evict: config.on_local_cost_evict.map(split_cost_fn),
        };

        Ok(Self {
            id,
            shared_tier: config.shared_tier,
            local_tier: config.local_tier,
            broker,
            codec: config.codec,
            on_hit: config.on_hit,
            on_miss: config.on_miss,
            local_hooks,
            registry,
            closed: AtomicBool::new(false),
        })
    }

    fn evict_handler(local: Arc<dyn Tier>) -> EventHandler {
        Arc::new(move |delivery| {
            let local = local.clone();
            Box::pin(async move {
                match delivery {
                    Ok(event) => {
                        if event.event_type == EventType::Evict {
                            if let Err(e) = local.del(&event.body.keys).await {
                                warn!(error = %e, "failed to apply peer eviction");
                            }
                        }
                    }
                    Err(Error::SelfEvent) => {}
                    Err(e) => warn!(error = %e, "eviction listener delivery error"),
                }
            })
        })
    }

    /// This factory's process-unique id, stamped on every outgoing event.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Validate and register a batch of prefixes, returning a [`Cache`]
    /// handle over them.
    ///
    /// Fails without registering anything if any prefix is empty, already
    /// registered in this process, or binds no tier the factory holds.
    pub fn new_cache(&self, configs: Vec<PrefixConfig>) -> Result<Cache> {
        let mut runtimes: HashMap<String, PrefixRuntime> = HashMap::with_capacity(configs.len());

        let mut used = self.registry.lock();
        for config in configs {
            if config.prefix.is_empty() {
                return Err(Error::Config("empty prefix is not allowed".into()));
            }
            if used.contains(&config.prefix) || runtimes.contains_key(&config.prefix) {
                return Err(Error::Config(format!(
                    "duplicated prefix: {}",
                    config.prefix
                )));
            }

            let mut runtime = PrefixRuntime {
                shared: None,
                local: None,
                shared_ttl: Duration::ZERO,
                local_ttl: Duration::ZERO,
                mgetter: config.mgetter,
                codec: config.codec.unwrap_or(self.codec),
            };

            for (kind, attribute) in &config.attributes {
                match kind {
                    TierKind::Shared => {
                        if let Some(tier) = &self.shared_tier {
                            runtime.shared = Some(tier.clone());
                            runtime.shared_ttl = attribute.ttl;
                        }
                    }
                    TierKind::Local => {
                        if let Some(tier) = &self.local_tier {
                            runtime.local = Some(tier.clone());
                            runtime.local_ttl = attribute.ttl;
                        }
                    }
                }
            }

            if runtime.shared.is_none() && runtime.local.is_none() {
                return Err(Error::Config(format!(
                    "no cache tier bound for prefix: {}",
                    config.prefix
                )));
            }

            runtimes.insert(config.prefix, runtime);
        }

        for prefix in runtimes.keys() {
            used.insert(prefix.clone());
        }
        drop(used);

        Ok(Cache::new(
            runtimes,
            self.broker.clone(),
            self.on_hit.clone(),
            self.on_miss.clone(),
            self.local_hooks.clone(),
        ))
    }

    /// Close the pub/sub transport and wait for the eviction listener to
    /// drain. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.broker.close().await;
        info!(factory_id = %self.id, "cache factory closed");
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("id", &self.id)
            .field("shared_tier", &self.shared_tier.is_some())
            .field("local_tier", &self.local_tier.is_some())
            .field("pubsub", &self.broker.registered())
            .finish()
    }
}
