//! Namespace package-key behaviour.
//!
//! The package key is process-wide and one-shot, so this lives in its own
//! integration binary: the library's unit tests run in a process that keeps
//! the default key.

use latte::testing::HashTier;
use latte::{set_package_key, Factory, FactoryConfig, PrefixConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_first_package_key_wins() {
    set_package_key("app");
    // Later sets are ignored.
    set_package_key("ignored");

    let shared = Arc::new(HashTier::new());
    let factory = Factory::new(FactoryConfig::new().with_shared_tier(shared.clone()))
        .await
        .unwrap();
    let cache = factory
        .new_cache(vec![
            PrefixConfig::new("ns").with_shared(Duration::from_secs(3600))
        ])
        .unwrap();

    cache.set("ns", "k", &1u8).await.unwrap();

    assert!(shared.contains("app:ns:k"));
    assert!(!shared.contains("ca:ns:k"));
    assert!(!shared.contains("ignored:ns:k"));

    let out: u8 = cache.get("ns", "k").await.unwrap();
    assert_eq!(out, 1);

    factory.close().await;
}
