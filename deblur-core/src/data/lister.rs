//! Deterministic shard listing
//!
//! Object stores make no promise about listing order, so keys are sorted
//! before anything downstream (in particular the seeded split) sees them.

use tracing::{debug, info};

use super::shard::ShardSpec;
use crate::error::{PipelineError, Result};
use crate::metrics::standard;
use crate::storage::ObjectStore;

/// Lists shards under a prefix in lexicographic key order
pub struct ShardLister<'a, S: ObjectStore> {
    store: &'a S,
}

impl<'a, S: ObjectStore> ShardLister<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// List, sort and number the shards under `prefix`
    ///
    /// An empty listing is a configuration error.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ShardSpec>> {
        let mut keys = self.store.list_objects(prefix).await?;
        if keys.is_empty() {
            return Err(PipelineError::EmptyListing {
                prefix: prefix.into(),
            });
        }
        keys.sort_unstable();
        keys.dedup();

        standard::SHARDS_LISTED.inc_by(keys.len() as u64);
        info!("Listed {} shards under '{}'", keys.len(), prefix);
        debug!("First shard: {:?}, last shard: {:?}", keys.first(), keys.last());

        Ok(keys
            .into_iter()
            .enumerate()
            .map(|(id, key)| ShardSpec::new(id as u32, key))
            .collect())
    }
}

/// Prefix holding the train+validation shards
pub fn trainval_prefix(prefix: &str) -> String {
    format!("{}/train", prefix.trim_end_matches('/'))
}

/// Prefix holding the test shards
pub fn test_prefix(prefix: &str) -> String {
    format!("{}/test", prefix.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_listing_is_sorted() {
        let store = MemoryStore::new();
        for name in ["c", "a", "d", "b", "e"] {
            store.insert(format!("reds/train-{}", name), vec![0u8]);
        }
        let shards = ShardLister::new(&store).list("reds/train").await.unwrap();
        let keys: Vec<&str> = shards.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["reds/train-a", "reds/train-b", "reds/train-c", "reds/train-d", "reds/train-e"]);
        assert_eq!(shards[3].id, 3);
    }

    #[tokio::test]
    async fn test_empty_listing_is_error() {
        let store = MemoryStore::new();
        store.insert("reds/test-0", vec![0u8]);
        let err = ShardLister::new(&store).list("reds/train").await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(trainval_prefix("reds/"), "reds/train");
        assert_eq!(test_prefix("reds"), "reds/test");
    }
}
