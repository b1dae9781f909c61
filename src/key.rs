//! Key namespacing.
//!
//! Fully-qualified cache keys have the shape `packageKey:prefix:userKey`;
//! pub/sub topics use `packageKey#tp#EventName`. The package key is a
//! process-wide namespace segment shared by every factory in the process.

use once_cell::sync::OnceCell;

const DEFAULT_PACKAGE_KEY: &str = "ca";
const TOPIC_KEY: &str = "tp";

const CACHE_DELIM: &str = ":";
const TOPIC_DELIM: &str = "#";

static PACKAGE_KEY: OnceCell<String> = OnceCell::new();

/// Set the process-wide package key used as the leading namespace segment.
///
/// One-shot: the first call wins and every later call is ignored. An empty
/// package key omits the segment from cache keys entirely. Defaults to
/// `"ca"` when never set.
pub fn set_package_key(key: impl Into<String>) {
    let _ = PACKAGE_KEY.set(key.into());
}

pub(crate) fn package_key() -> &'static str {
    PACKAGE_KEY
        .get()
        .map(String::as_str)
        .unwrap_or(DEFAULT_PACKAGE_KEY)
}

fn custom_key(delimiter: &str, components: &[&str]) -> String {
    components.join(delimiter)
}

/// Build the fully-qualified cache key for `(prefix, key)`.
pub(crate) fn cache_key(prefix: &str, key: &str) -> String {
    let pkg = package_key();
    if pkg.is_empty() {
        custom_key(CACHE_DELIM, &[prefix, key])
    } else {
        custom_key(CACHE_DELIM, &[pkg, prefix, key])
    }
}

/// Qualify a batch of user keys under one prefix, preserving order.
pub(crate) fn cache_keys(prefix: &str, keys: &[String]) -> Vec<String> {
    keys.iter().map(|k| cache_key(prefix, k)).collect()
}

/// Recover `(prefix, user_key)` from a fully-qualified cache key.
///
/// When a package key is set the first segment is dropped; otherwise the
/// first segment is the prefix. A key with too few segments yields an empty
/// remainder rather than an error.
pub(crate) fn split_prefix_key(full_key: &str) -> (&str, &str) {
    let mixed = if package_key().is_empty() {
        full_key
    } else {
        match full_key.split_once(CACHE_DELIM) {
            Some((_, rest)) => rest,
            None => return (full_key, ""),
        }
    };

    match mixed.split_once(CACHE_DELIM) {
        Some((prefix, key)) => (prefix, key),
        None => (mixed, ""),
    }
}

/// Build the topic name for an event, e.g. `ca#tp#Evict`.
pub(crate) fn topic_key(event_name: &str) -> String {
    custom_key(TOPIC_DELIM, &[package_key(), TOPIC_KEY, event_name])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("mixed", "keyS"), "ca:mixed:keyS");
        assert_eq!(cache_key("u", "t"), "ca:u:t");
    }

    #[test]
    fn test_cache_keys_preserves_order() {
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(cache_keys("p", &keys), vec!["ca:p:a", "ca:p:b"]);
    }

    #[test]
    fn test_split_round_trip() {
        let full = cache_key("session", "user-42");
        assert_eq!(split_prefix_key(&full), ("session", "user-42"));
    }

    #[test]
    fn test_split_key_with_delimiter_in_user_key() {
        // Only the first two segments are structural.
        assert_eq!(split_prefix_key("ca:p:a:b:c"), ("p", "a:b:c"));
    }

    #[test]
    fn test_split_degenerate_keys() {
        assert_eq!(split_prefix_key("bare"), ("bare", ""));
        assert_eq!(split_prefix_key("ca:only-prefix"), ("only-prefix", ""));
    }

    #[test]
    fn test_topic_key() {
        assert_eq!(topic_key("Evict"), "ca#tp#Evict");
    }
}
