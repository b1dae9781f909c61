//! Configuration types for the factory and for per-prefix registration.

use crate::codec::{Codec, Encodable};
use crate::pubsub::PubSub;
use crate::tier::Tier;
use crate::types::{BoxError, BoxFuture, KeyCountFn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Batched miss-filler registered per prefix.
///
/// Invoked with the user keys that missed every tier; must return exactly
/// one value per key, positionally. Each value is encoded with the prefix
/// codec and refilled into the tiers.
pub type MGetter = Arc<
    dyn Fn(Vec<String>) -> BoxFuture<'static, std::result::Result<Vec<Box<dyn Encodable>>, BoxError>>
        + Send
        + Sync,
>;

/// Which cache layer a prefix attribute applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// The cross-process tier.
    Shared,
    /// The process-local tier.
    Local,
}

/// Per-tier settings for one prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierAttribute {
    /// Time-to-live applied by the tier's `mset`.
    pub ttl: Duration,
}

impl TierAttribute {
    /// Create an attribute with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

/// Construction parameters for [`Factory`](crate::Factory).
#[derive(Default)]
pub struct FactoryConfig {
    /// Cross-process tier handed to prefixes that bind [`TierKind::Shared`].
    pub shared_tier: Option<Arc<dyn Tier>>,

    /// Process-local tier handed to prefixes that bind [`TierKind::Local`].
    pub local_tier: Option<Arc<dyn Tier>>,

    /// Pub/sub transport for cross-process eviction. Without it, eviction
    /// events are neither published nor consumed.
    pub pubsub: Option<Arc<dyn PubSub>>,

    /// Default codec for every prefix that does not override it.
    pub codec: Codec,

    /// Fired with `(prefix, key, 1)` for every cache hit.
    pub on_hit: Option<KeyCountFn>,

    /// Fired with `(prefix, key, 1)` for every cache miss.
    pub on_miss: Option<KeyCountFn>,

    /// Fired with `(prefix, key, cost)` when the local tier admits an entry.
    pub on_local_cost_add: Option<KeyCountFn>,

    /// Fired with `(prefix, key, cost)` when the local tier evicts an entry.
    pub on_local_cost_evict: Option<KeyCountFn>,
}

impl FactoryConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared tier.
    pub fn with_shared_tier(mut self, tier: Arc<dyn Tier>) -> Self {
        self.shared_tier = Some(tier);
        self
    }

    /// Set the local tier.
    pub fn with_local_tier(mut self, tier: Arc<dyn Tier>) -> Self {
        self.local_tier = Some(tier);
        self
    }

    /// Attach a pub/sub transport.
    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Override the default codec.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the cache-hit callback.
    pub fn with_on_hit(mut self, f: KeyCountFn) -> Self {
        self.on_hit = Some(f);
        self
    }

    /// Set the cache-miss callback.
    pub fn with_on_miss(mut self, f: KeyCountFn) -> Self {
        self.on_miss = Some(f);
        self
    }

    /// Set the local-tier cost-add callback.
    pub fn with_on_local_cost_add(mut self, f: KeyCountFn) -> Self {
        self.on_local_cost_add = Some(f);
        self
    }

    /// Set the local-tier cost-evict callback.
    pub fn with_on_local_cost_evict(mut self, f: KeyCountFn) -> Self {
        self.on_local_cost_evict = Some(f);
        self
    }
}

impl std::fmt::Debug for FactoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryConfig")
            .field("shared_tier", &self.shared_tier.is_some())
            .field("local_tier", &self.local_tier.is_some())
            .field("pubsub", &self.pubsub.is_some())
            .field("codec", &self.codec)
            .finish()
    }
}

/// Registration settings for one prefix.
///
/// A prefix must bind at least one tier; binding a tier the factory was not
/// constructed with is a registration error surfaced by
/// [`Factory::new_cache`](crate::Factory::new_cache).
#[derive(Clone, Default)]
pub struct PrefixConfig {
    /// Namespace segment, non-empty and unique within the process.
    pub prefix: String,

    /// Tier bindings with their TTLs. At least one entry required.
    pub attributes: HashMap<TierKind, TierAttribute>,

    /// Optional batched miss-filler.
    pub mgetter: Option<MGetter>,

    /// Optional codec override for this prefix.
    pub codec: Option<Codec>,
}

impl PrefixConfig {
    /// Create a configuration for `prefix` with no tier bindings.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Bind the shared tier with the given TTL.
    pub fn with_shared(mut self, ttl: Duration) -> Self {
        self.attributes.insert(TierKind::Shared, TierAttribute::new(ttl));
        self
    }

    /// Bind the local tier with the given TTL.
    pub fn with_local(mut self, ttl: Duration) -> Self {
        self.attributes.insert(TierKind::Local, TierAttribute::new(ttl));
        self
    }

    /// Set the batched miss-filler.
    pub fn with_mgetter(mut self, mgetter: MGetter) -> Self {
        self.mgetter = Some(mgetter);
        self
    }

    /// Override the factory codec for this prefix.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = Some(codec);
        self
    }
}

impl std::fmt::Debug for PrefixConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixConfig")
            .field("prefix", &self.prefix)
            .field("attributes", &self.attributes)
            .field("mgetter", &self.mgetter.is_some())
            .field("codec", &self.codec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_config_builders() {
        let config = PrefixConfig::new("session")
            .with_shared(Duration::from_secs(3600))
            .with_local(Duration::from_secs(600))
            .with_codec(Codec::Bincode);

        assert_eq!(config.prefix, "session");
        assert_eq!(
            config.attributes.get(&TierKind::Shared),
            Some(&TierAttribute::new(Duration::from_secs(3600)))
        );
        assert_eq!(
            config.attributes.get(&TierKind::Local),
            Some(&TierAttribute::new(Duration::from_secs(600)))
        );
        assert_eq!(config.codec, Some(Codec::Bincode));
        assert!(config.mgetter.is_none());
    }

    #[test]
    fn test_factory_config_defaults() {
        let config = FactoryConfig::new();
        assert!(config.shared_tier.is_none());
        assert!(config.local_tier.is_none());
        assert!(config.pubsub.is_none());
        assert_eq!(config.codec, Codec::Json);
    }
}
