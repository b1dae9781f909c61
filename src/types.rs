//! Shared type aliases used throughout the coordinator.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed error type returned by user-supplied getters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed future, the object-safe shape for stored async callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Observation callback invoked with `(prefix, user_key, count)`.
///
/// Used for the hit/miss counters and, with `count` carrying a byte cost,
/// for the local-tier cost callbacks.
pub type KeyCountFn = Arc<dyn Fn(&str, &str, usize) + Send + Sync>;
