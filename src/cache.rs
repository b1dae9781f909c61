//! The cache coordinator.
//!
//! Orchestrates reads and writes across the local and shared tiers:
//! cache-aside reads with automatic refill, write-through refill on miss,
//! per-key request coalescing, and eviction broadcast so that peer
//! processes drop stale local copies.

use crate::coalesce::SingleFlight;
use crate::codec::Codec;
use crate::config::MGetter;
use crate::error::{Error, Result};
use crate::event::{Event, MessageBroker};
use crate::key;
use crate::tier::{MSetHooks, Tier};
use crate::types::{BoxError, KeyCountFn};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Resolved per-prefix runtime: the bound tiers, TTLs, miss-filler, codec.
pub(crate) struct PrefixRuntime {
    pub(crate) shared: Option<Arc<dyn Tier>>,
    pub(crate) local: Option<Arc<dyn Tier>>,
    pub(crate) shared_ttl: Duration,
    pub(crate) local_ttl: Duration,
    pub(crate) mgetter: Option<MGetter>,
    pub(crate) codec: Codec,
}

struct CacheInner {
    configs: HashMap<String, PrefixRuntime>,
    broker: Arc<MessageBroker>,
    flight: SingleFlight,
    on_hit: Option<KeyCountFn>,
    on_miss: Option<KeyCountFn>,
    local_hooks: MSetHooks,
}

/// Handle over a group of prefixes registered together.
///
/// Cheap to clone; safe for concurrent use from many tasks.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

/// Multi-key read result.
///
/// Duplicates in the request are preserved: `len()` equals the number of
/// user-supplied keys and `get(i)` routes through the dedup index map.
/// Immutable once returned.
#[derive(Clone)]
pub struct MGetResult {
    index_map: Vec<usize>,
    vals: Vec<Option<Bytes>>,
    errs: Vec<Option<Error>>,
    codec: Codec,
}

impl MGetResult {
    fn empty(codec: Codec) -> Self {
        Self {
            index_map: Vec::new(),
            vals: Vec::new(),
            errs: Vec::new(),
            codec,
        }
    }

    /// Number of elements, equal to the number of keys requested.
    pub fn len(&self) -> usize {
        self.index_map.len()
    }

    /// True when the request had no keys.
    pub fn is_empty(&self) -> bool {
        self.index_map.is_empty()
    }

    /// Decode element `idx` into `T`, or return the per-element error
    /// (`CacheMiss`, a codec error, or a getter error for that position).
    pub fn get<T: DeserializeOwned>(&self, idx: usize) -> Result<T> {
        let bytes = self.bytes_at(idx)?;
        self.codec.decode(&bytes)
    }

    pub(crate) fn bytes_at(&self, idx: usize) -> Result<Bytes> {
        let &slot = self
            .index_map
            .get(idx)
            .ok_or(Error::ResultIndexInvalid(idx))?;

        if let Some(err) = &self.errs[slot] {
            return Err(err.clone());
        }

        Ok(self.vals[slot].clone().unwrap_or_default())
    }
}

impl std::fmt::Debug for MGetResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MGetResult")
            .field("len", &self.len())
            .field("errs", &self.errs.iter().filter(|e| e.is_some()).count())
            .finish()
    }
}

/// Deduplicate `keys` preserving first-occurrence order.
///
/// Returns the indirect index map (original position to deduped position)
/// and the deduped keys.
fn dedup(keys: &[String]) -> (Vec<usize>, Vec<String>) {
    if keys.len() == 1 {
        return (vec![0], keys.to_vec());
    }

    let mut index_map = Vec::with_capacity(keys.len());
    let mut deduped = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for k in keys {
        match seen.get(k.as_str()) {
            Some(&slot) => index_map.push(slot),
            None => {
                let slot = deduped.len();
                seen.insert(k, slot);
                index_map.push(slot);
                deduped.push(k.clone());
            }
        }
    }

    (index_map, deduped)
}

impl Cache {
    pub(crate) fn new(
        configs: HashMap<String, PrefixRuntime>,
        broker: Arc<MessageBroker>,
        on_hit: Option<KeyCountFn>,
        on_miss: Option<KeyCountFn>,
        local_hooks: MSetHooks,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                configs,
                broker,
                flight: SingleFlight::new(),
                on_hit,
                on_miss,
                local_hooks,
            }),
        }
    }

    /// Read one key, coalesced with concurrent reads of the same key, and
    /// decode it into `T`.
    pub async fn get<T: DeserializeOwned>(&self, prefix: &str, key: &str) -> Result<T> {
        let inner = &self.inner;
        let codec = inner.config(prefix)?.codec;
        let full_key = key::cache_key(prefix, key);

        let this = self;
        let bytes = inner
            .flight
            .run(&full_key, move || async move {
                let result = this.mget_inner(prefix, &[key.to_string()]).await?;
                result.bytes_at(0)
            })
            .await?;

        codec.decode(&bytes)
    }

    /// Read many keys.
    ///
    /// Misses are filled through the prefix miss-filler when one is
    /// registered; remaining misses surface per element as `CacheMiss`.
    pub async fn mget(&self, prefix: &str, keys: &[&str]) -> Result<MGetResult> {
        let owned: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.mget_inner(prefix, &owned).await
    }

    /// Read one key, filling it from `getter` on miss and refilling both
    /// tiers with the encoded result. Coalesced per key.
    pub async fn get_by_func<T, F, Fut>(&self, prefix: &str, key: &str, getter: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        let inner = &self.inner;
        let cfg = inner.config(prefix)?;
        let full_key = key::cache_key(prefix, key);

        let flight_key = full_key.clone();
        let bytes = inner
            .flight
            .run(&full_key, move || async move {
                let vals = inner.load(cfg, std::slice::from_ref(&flight_key)).await?;

                if let Some(bytes) = &vals[0] {
                    inner.hit(prefix, key);
                    return Ok(bytes.clone());
                }

                inner.miss(prefix, key);

                let value = getter().await.map_err(|e| Error::Getter(e.to_string()))?;
                let bytes = cfg.codec.encode(&value)?;

                let mut entries = HashMap::with_capacity(1);
                entries.insert(flight_key, bytes.clone());
                inner.refill(cfg, &entries).await?;

                Ok(bytes)
            })
            .await?;

        cfg.codec.decode(&bytes)
    }

    /// Store one value.
    pub async fn set<T: Serialize>(&self, prefix: &str, key: &str, value: &T) -> Result<()> {
        self.mset(prefix, &[(key, value)]).await
    }

    /// Store many values: encode each with the prefix codec, then refill
    /// both tiers and broadcast eviction to peers.
    pub async fn mset<T: Serialize>(&self, prefix: &str, entries: &[(&str, T)]) -> Result<()> {
        let cfg = self.inner.config(prefix)?;

        let mut encoded = HashMap::with_capacity(entries.len());
        for (user_key, value) in entries {
            let bytes = cfg.codec.encode(value)?;
            encoded.insert(key::cache_key(prefix, user_key), bytes);
        }

        self.inner.refill(cfg, &encoded).await
    }

    /// Delete keys from both tiers and broadcast eviction to peers.
    pub async fn del(&self, prefix: &str, keys: &[&str]) -> Result<()> {
        let cfg = self.inner.config(prefix)?;
        if keys.is_empty() {
            return Ok(());
        }

        let owned: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let full_keys = key::cache_keys(prefix, &owned);
        self.inner.del_keys(cfg, &full_keys).await
    }

    async fn mget_inner(&self, prefix: &str, keys: &[String]) -> Result<MGetResult> {
        let inner = &self.inner;
        let cfg = inner.config(prefix)?;

        if keys.is_empty() {
            return Ok(MGetResult::empty(cfg.codec));
        }

        let (index_map, deduped) = dedup(keys);
        let full_keys = key::cache_keys(prefix, &deduped);

        let vals = inner.load(cfg, &full_keys).await?;

        let mut result = MGetResult {
            index_map,
            vals: vec![None; deduped.len()],
            errs: vec![None; deduped.len()],
            codec: cfg.codec,
        };

        let mut miss: Vec<(usize, String)> = Vec::new();
        for (slot, user_key) in deduped.iter().enumerate() {
            match &vals[slot] {
                Some(bytes) => {
                    result.vals[slot] = Some(bytes.clone());
                    inner.hit(prefix, user_key);
                }
                None => {
                    result.errs[slot] = Some(Error::CacheMiss);
                    inner.miss(prefix, user_key);
                    miss.push((slot, user_key.clone()));
                }
            }
        }

        if miss.is_empty() {
            return Ok(result);
        }

        // Without a miss-filler this is the plain get-and-set pattern; the
        // caller sees CacheMiss per missing position.
        let Some(mgetter) = &cfg.mgetter else {
            return Ok(result);
        };

        let miss_keys: Vec<String> = miss.iter().map(|(_, k)| k.clone()).collect();
        debug!(prefix, misses = miss_keys.len(), "filling misses via mgetter");

        let filled = mgetter(miss_keys)
            .await
            .map_err(|e| Error::Getter(e.to_string()))?;
        if filled.len() != miss.len() {
            return Err(Error::GetterResponseLength {
                expected: miss.len(),
                actual: filled.len(),
            });
        }

        let mut refill_entries = HashMap::with_capacity(filled.len());
        for ((slot, user_key), value) in miss.iter().zip(filled.iter()) {
            match value.encode_with(cfg.codec) {
                Ok(bytes) => {
                    refill_entries.insert(key::cache_key(prefix, user_key), bytes.clone());
                    result.vals[*slot] = Some(bytes);
                    result.errs[*slot] = None;
                }
                // Other positions still refill.
                Err(e) => result.errs[*slot] = Some(e),
            }
        }

        // The data is returned to the caller even when the refill fails.
        if let Err(e) = inner.refill(cfg, &refill_entries).await {
            warn!(prefix, error = %e, "refill after miss-fill failed");
        }

        Ok(result)
    }
}

impl CacheInner {
    fn config(&self, prefix: &str) -> Result<&PrefixRuntime> {
        self.configs.get(prefix).ok_or(Error::PrefixNotRegistered)
    }

    fn hit(&self, prefix: &str, key: &str) {
        if let Some(on_hit) = &self.on_hit {
            on_hit(prefix, key, 1);
        }
    }

    fn miss(&self, prefix: &str, key: &str) {
        if let Some(on_miss) = &self.on_miss {
            on_miss(prefix, key, 1);
        }
    }

    /// Produce one value per key by consulting the tiers in order, then
    /// refresh the local tier with everything currently valid.
    async fn load(&self, cfg: &PrefixRuntime, full_keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut vals: Vec<Option<Bytes>> = vec![None; full_keys.len()];

        if let Some(local) = &cfg.local {
            // A failing local tier must not hide a good shared-tier value.
            match local.mget(full_keys).await {
                Ok(local_vals) if local_vals.len() == full_keys.len() => vals = local_vals,
                Ok(_) => warn!("local tier returned misshapen batch; treated as full miss"),
                Err(e) => debug!(error = %e, "local tier mget failed; treated as full miss"),
            }
        }

        let miss: Vec<usize> = (0..full_keys.len()).filter(|&i| vals[i].is_none()).collect();

        if !miss.is_empty() {
            if let Some(shared) = &cfg.shared {
                let miss_keys: Vec<String> =
                    miss.iter().map(|&i| full_keys[i].clone()).collect();
                let miss_vals = shared.mget(&miss_keys).await?;

                for (&i, val) in miss.iter().zip(miss_vals) {
                    vals[i] = val;
                }
            }
        }

        if let Some(local) = &cfg.local {
            let entries: HashMap<String, Bytes> = full_keys
                .iter()
                .zip(&vals)
                .filter_map(|(k, v)| v.as_ref().map(|bytes| (k.clone(), bytes.clone())))
                .collect();

            if !entries.is_empty() {
                if let Err(e) = local
                    .mset(&entries, cfg.local_ttl, &self.local_hooks)
                    .await
                {
                    warn!(error = %e, entries = entries.len(), "local tier refresh failed");
                }

                self.broadcast_evict(entries.into_keys().collect()).await;
            }
        }

        Ok(vals)
    }

    /// Write entries through the tiers: shared first, then local, then the
    /// eviction broadcast. A local failure is swallowed and suppresses the
    /// broadcast for this call.
    async fn refill(&self, cfg: &PrefixRuntime, entries: &HashMap<String, Bytes>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        if let Some(shared) = &cfg.shared {
            shared
                .mset(entries, cfg.shared_ttl, &MSetHooks::none())
                .await?;
        }

        if let Some(local) = &cfg.local {
            if let Err(e) = local
                .mset(entries, cfg.local_ttl, &self.local_hooks)
                .await
            {
                warn!(error = %e, entries = entries.len(), "local tier refill failed");
                return Ok(());
            }

            self.broadcast_evict(entries.keys().cloned().collect()).await;
        }

        Ok(())
    }

    /// Delete from shared then local, then broadcast. Shared and local
    /// errors both propagate; a failed local delete suppresses the
    /// broadcast.
    async fn del_keys(&self, cfg: &PrefixRuntime, full_keys: &[String]) -> Result<()> {
        if let Some(shared) = &cfg.shared {
            shared.del(full_keys).await?;
        }

        if let Some(local) = &cfg.local {
            local.del(full_keys).await?;
            self.broadcast_evict(full_keys.to_vec()).await;
        }

        Ok(())
    }

    async fn broadcast_evict(&self, keys: Vec<String>) {
        if !self.broker.registered() {
            return;
        }

        if let Err(e) = self.broker.send(Event::evict(keys)).await {
            warn!(error = %e, "evict broadcast failed");
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("prefixes", &self.inner.configs.len())
            .finish()
    }
}
