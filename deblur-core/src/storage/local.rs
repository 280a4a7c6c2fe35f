//! Filesystem-backed object store
//!
//! Keys are `/`-separated paths relative to a root directory.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::ObjectStore;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn io_error(what: &str, path: &Path, e: std::io::Error) -> PipelineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        return PipelineError::ObjectNotFound {
            key: path.display().to_string(),
        };
    }
    PipelineError::StorageError {
        message: format!("{} failed for {}: {}", what, path.display(), e),
    }
}

impl ObjectStore for LocalStore {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let wanted = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = entry.map_err(|e| PipelineError::StorageError {
                    message: format!("List failed under {}: {}", root.display(), e),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&wanted) {
                    keys.push(key);
                }
            }
            Ok::<_, PipelineError>(keys)
        })
        .await
        .map_err(|e| PipelineError::Internal {
            message: format!("List task failed: {}", e),
        })??;

        debug!("Listed {} objects under {}", keys.len(), prefix);
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| io_error("Read", &path, e))?;
        Ok(Bytes::from(data))
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("Create dir", parent, e))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| io_error("Write", &path, e))?;
        debug!("Put {} ({} bytes)", key, data.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_list_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put_object("reds/train-00001.rec", Bytes::from_static(b"a")).await.unwrap();
        store.put_object("reds/train-00000.rec", Bytes::from_static(b"b")).await.unwrap();
        store.put_object("reds/test-00000.rec", Bytes::from_static(b"c")).await.unwrap();

        let mut keys = store.list_objects("reds/train").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["reds/train-00000.rec", "reds/train-00001.rec"]);

        let data = store.get_object("reds/test-00000.rec").await.unwrap();
        assert_eq!(&data[..], b"c");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let err = store.get_object("nope").await.unwrap_err();
        assert!(matches!(err, PipelineError::ObjectNotFound { .. }));
    }
}
