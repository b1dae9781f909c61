//! In-memory local tier backed by Moka.

use super::{CostFn, MSetHooks, Tier};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use moka::{Expiry, notification::RemovalCause};
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cap on the randomised TTL offset.
const MAX_TTL_OFFSET: Duration = Duration::from_secs(10);

/// Configuration for [`MemoryTier`].
#[derive(Debug, Clone)]
pub struct MemoryTierConfig {
    /// Maximum number of entries the tier admits.
    pub max_capacity: u64,

    /// Fixed TTL offset bound. Each stored entry gets `ttl` plus a random
    /// duration below this bound so that entries written together do not
    /// expire together. `None` derives the bound from the TTL itself
    /// (`ttl / 10`, capped at 10 s); `Duration::ZERO` disables the offset.
    pub ttl_offset: Option<Duration>,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
            ttl_offset: None,
        }
    }
}

impl MemoryTierConfig {
    /// Create a configuration with the given capacity.
    pub fn new(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set a fixed TTL offset bound.
    pub fn with_ttl_offset(mut self, offset: Duration) -> Self {
        self.ttl_offset = Some(offset);
        self
    }
}

#[derive(Clone)]
struct MemoryEntry {
    bytes: Bytes,
    ttl: Duration,
    on_evict: Option<CostFn>,
}

struct PerEntryExpiry;

impl Expiry<String, MemoryEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &MemoryEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &MemoryEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // An overwrite carries a fresh TTL.
        Some(entry.ttl)
    }
}

/// Process-local tier with admission-frequency eviction and per-entry TTL.
///
/// Natural (capacity or TTL) evictions are a tier-local matter: they fire
/// the `on_cost_evict` hook of the `mset` call that stored the entry but do
/// not propagate to peer processes. Only coordinator-driven refills and
/// deletes broadcast eviction events.
pub struct MemoryTier {
    cache: Cache<String, MemoryEntry>,
    ttl_offset: Option<Duration>,
}

impl MemoryTier {
    /// Create a tier holding at most `max_capacity` entries.
    pub fn new(max_capacity: u64) -> Self {
        Self::with_config(MemoryTierConfig::new(max_capacity))
    }

    /// Create a tier from a full configuration.
    pub fn with_config(config: MemoryTierConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(PerEntryExpiry)
            .eviction_listener(|key: std::sync::Arc<String>, entry: MemoryEntry, cause| {
                if !matches!(cause, RemovalCause::Expired | RemovalCause::Size) {
                    return;
                }
                if let Some(on_evict) = &entry.on_evict {
                    on_evict(key.as_str(), entry.bytes.len());
                }
            })
            .build();

        Self {
            cache,
            ttl_offset: config.ttl_offset,
        }
    }

    /// Whether the tier currently holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Number of entries currently admitted.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Run pending maintenance (eviction bookkeeping). Test support.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    fn jittered(&self, ttl: Duration) -> Duration {
        let bound = match self.ttl_offset {
            Some(offset) => offset,
            None => (ttl / 10).min(MAX_TTL_OFFSET),
        };

        let bound_ms = bound.as_millis() as u64;
        if bound_ms == 0 {
            return ttl;
        }

        ttl + Duration::from_millis(rand::thread_rng().gen_range(0..bound_ms))
    }
}

#[async_trait]
impl Tier for MemoryTier {
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut vals = Vec::with_capacity(keys.len());
        for key in keys {
            vals.push(self.cache.get(key).await.map(|entry| entry.bytes));
        }

        Ok(vals)
    }

    async fn mset(
        &self,
        entries: &HashMap<String, Bytes>,
        ttl: Duration,
        hooks: &MSetHooks,
    ) -> Result<()> {
        for (key, bytes) in entries {
            let cost = bytes.len();
            if let Some(on_add) = &hooks.on_cost_add {
                on_add(key, cost);
            }

            let entry = MemoryEntry {
                bytes: bytes.clone(),
                ttl: self.jittered(ttl),
                on_evict: hooks.on_cost_evict.clone(),
            };
            self.cache.insert(key.clone(), entry).await;
        }

        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.cache.invalidate(key).await;
        }

        Ok(())
    }
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("entry_count", &self.entry_count())
            .finish()
    }
}
