//! Null-object tier.

use super::{MSetHooks, Tier};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// A tier without storage.
///
/// Every read misses and every write succeeds without effect. Configuring
/// the coordinator with a `NoopTier` in one slot runs it against a single
/// real tier.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTier;

impl NoopTier {
    /// Create a no-op tier.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tier for NoopTier {
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        Ok(vec![None; keys.len()])
    }

    async fn mset(
        &self,
        _entries: &HashMap<String, Bytes>,
        _ttl: Duration,
        _hooks: &MSetHooks,
    ) -> Result<()> {
        Ok(())
    }

    async fn del(&self, _keys: &[String]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_right_shaped_results() {
        let tier = NoopTier::new();

        let keys = vec!["ca:p:a".to_string(), "ca:p:b".to_string()];
        let vals = tier.mget(&keys).await.unwrap();
        assert_eq!(vals, vec![None, None]);

        let mut entries = HashMap::new();
        entries.insert("ca:p:a".to_string(), Bytes::from_static(b"1"));
        tier.mset(&entries, Duration::from_secs(60), &MSetHooks::none())
            .await
            .unwrap();

        // Still a miss after the write.
        let vals = tier.mget(&keys[..1].to_vec()).await.unwrap();
        assert_eq!(vals, vec![None]);

        tier.del(&keys).await.unwrap();
    }
}
