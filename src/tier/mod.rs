//! Cache tier abstraction.
//!
//! A tier is one cache layer (process-local or shared across processes).
//! Both layers implement the same three batched operations over
//! fully-qualified keys and opaque byte payloads; the coordinator decides
//! the traversal order and the refill policy.

pub mod memory;
pub mod noop;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use memory::{MemoryTier, MemoryTierConfig};
pub use noop::NoopTier;

/// Cost callback invoked with `(fully_qualified_key, cost_in_bytes)`.
pub type CostFn = Arc<dyn Fn(&str, usize) + Send + Sync>;

/// Callbacks applied by a `mset` call.
///
/// Only the in-memory tier fires these; `cost` is the byte length of the
/// stored payload.
#[derive(Clone, Default)]
pub struct MSetHooks {
    /// Fired when an entry is admitted.
    pub on_cost_add: Option<CostFn>,
    /// Fired when the tier later evicts the entry.
    pub on_cost_evict: Option<CostFn>,
}

impl MSetHooks {
    /// Hooks that do nothing.
    pub fn none() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MSetHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MSetHooks")
            .field("on_cost_add", &self.on_cost_add.is_some())
            .field("on_cost_evict", &self.on_cost_evict.is_some())
            .finish()
    }
}

/// One cache layer.
///
/// All operations are batched. Per-key absence is expressed in the result
/// shape (`None`), never as an error; errors mean the tier itself failed.
#[async_trait]
pub trait Tier: Send + Sync {
    /// Fetch many keys. The result has exactly one element per input key,
    /// positionally; a missing key yields `None`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    /// Store many entries under one TTL. Implementations may randomise the
    /// actual expiry by a bounded offset to spread out expirations. Empty
    /// input is a no-op success.
    async fn mset(
        &self,
        entries: &HashMap<String, Bytes>,
        ttl: Duration,
        hooks: &MSetHooks,
    ) -> Result<()>;

    /// Delete many keys. Deleting a non-existing key is success.
    async fn del(&self, keys: &[String]) -> Result<()>;
}
