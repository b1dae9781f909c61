//! Multi-tier cache coordinator.
//!
//! This crate fronts two caching tiers (a process-local in-memory tier and
//! a shared cross-process tier) behind a single typed API:
//!
//! - **Cache-aside reads** with automatic refill of both tiers
//! - **Write-through refill** on miss via per-prefix batched miss-fillers
//! - **Request coalescing** so one backing call serves all concurrent
//!   readers of a key
//! - **Pub/sub eviction** so local tiers in peer processes drop stale
//!   copies when any peer writes or deletes
//!
//! # Example
//!
//! ```rust,no_run
//! use latte::{Factory, FactoryConfig, MemoryTier, PrefixConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> latte::Result<()> {
//!     let factory = Factory::new(
//!         FactoryConfig::new().with_local_tier(Arc::new(MemoryTier::new(100_000))),
//!     )
//!     .await?;
//!
//!     let cache = factory.new_cache(vec![
//!         PrefixConfig::new("user").with_local(Duration::from_secs(600)),
//!     ])?;
//!
//!     cache.set("user", "42", &"alice").await?;
//!     let name: String = cache.get("user", "42").await?;
//!     assert_eq!(name, "alice");
//!
//!     factory.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Cache handle                 │
//! │  get / mget / get_by_func / set / mset / del │
//! └──────────────────────────────────────────────┘
//!          │                          │
//!          ▼                          ▼
//! ┌─────────────────┐       ┌──────────────────┐
//! │   Local tier    │       │   Shared tier    │
//! │ (moka, in-proc) │       │ (cross-process)  │
//! └─────────────────┘       └──────────────────┘
//!          ▲
//!          │ evict on peer write/delete
//! ┌─────────────────┐
//! │  Pub/sub broker │
//! └─────────────────┘
//! ```
//!
//! # Consistency model
//!
//! Writes land in the shared tier first, then the local tier, then an
//! eviction event is published; peers that receive it drop their local
//! copies and find the new value in the shared tier on their next read.
//! Cross-process consistency is eventual and best-effort by design.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod factory;
pub mod pubsub;
pub mod testing;
pub mod tier;

mod coalesce;
mod event;
mod key;
mod types;

// Re-export the public API at the crate root for convenience.
pub use cache::{Cache, MGetResult};
pub use codec::{Codec, Encodable};
pub use config::{FactoryConfig, MGetter, PrefixConfig, TierAttribute, TierKind};
pub use error::{Error, Result};
pub use factory::{clear_prefixes, Factory};
pub use key::set_package_key;
pub use pubsub::{Message, PubSub};
pub use tier::{CostFn, MSetHooks, MemoryTier, MemoryTierConfig, NoopTier, Tier};
pub use types::{BoxError, BoxFuture, KeyCountFn};
