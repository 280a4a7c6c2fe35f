//! In-process object store
//!
//! Keys live in a hash map, so listing order is arbitrary.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::ObjectStore;
use crate::error::{PipelineError, Result};

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object synchronously
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(key.into(), data.into());
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::ObjectNotFound { key: key.into() })
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects.write().insert(key.into(), data);
        Ok(())
    }
}
