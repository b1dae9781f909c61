//! Error types for the cache coordinator.

use thiserror::Error;

/// Result type alias for cache coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache coordinator.
///
/// The coalescer shares a single outcome between concurrent callers, so the
/// error type is `Clone`; transport and codec failures carry their rendered
/// message rather than the source error.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// No configuration registered for the requested prefix.
    #[error("prefix not registered")]
    PrefixNotRegistered,

    /// The key is absent from every consulted tier.
    ///
    /// Reported per element through [`MGetResult::get`](crate::MGetResult::get),
    /// never for a whole multi-key call.
    #[error("cache miss")]
    CacheMiss,

    /// The batched miss-filler returned a sequence of the wrong length.
    #[error("mgetter returned {actual} values for {expected} keys")]
    GetterResponseLength { expected: usize, actual: usize },

    /// A miss-filler (`MGetter` or one-time getter) failed.
    #[error("getter error: {0}")]
    Getter(String),

    /// `MGetResult::get` index out of range.
    #[error("result index {0} out of range")]
    ResultIndexInvalid(usize),

    /// `listen` was invoked with no event types.
    #[error("no event type to listen")]
    NoEventType,

    /// An eviction event originated by this process came back through
    /// pub/sub. Informational; the listener performs no work for it.
    #[error("event triggered by itself")]
    SelfEvent,

    /// A message arrived on a topic with no registered event type.
    #[error("no such topic registered: {0}")]
    UnknownTopic(String),

    /// Tier or pub/sub transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Value could not be encoded to bytes.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the requested value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration fault (empty prefix, duplicate prefix, no tier bound).
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// True for the per-element miss marker.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Error::CacheMiss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Error::CacheMiss.to_string(), "cache miss");
        assert_eq!(
            Error::GetterResponseLength {
                expected: 2,
                actual: 3
            }
            .to_string(),
            "mgetter returned 3 values for 2 keys"
        );
        assert_eq!(
            Error::UnknownTopic("ca#tp#Unknown".into()).to_string(),
            "no such topic registered: ca#tp#Unknown"
        );
    }

    #[test]
    fn test_clone_preserves_variant() {
        let err = Error::Transport("connection reset".into());
        assert!(matches!(err.clone(), Error::Transport(m) if m == "connection reset"));
        assert!(Error::CacheMiss.is_cache_miss());
        assert!(!Error::PrefixNotRegistered.is_cache_miss());
    }
}
