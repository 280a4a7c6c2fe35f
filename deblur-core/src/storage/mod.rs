//! Object storage backends
//!
//! Everything the pipeline needs from storage is listing by prefix and
//! whole-object reads and writes.

pub mod local;
pub mod memory;
pub mod s3;

use bytes::Bytes;
use std::future::Future;

use crate::error::Result;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::{S3Client, S3Config};

/// Minimal object store interface
///
/// Listing order is whatever the backend returns; callers that need a
/// stable order must sort.
pub trait ObjectStore: Send + Sync + 'static {
    /// List object keys starting with `prefix`
    fn list_objects(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Read a whole object
    fn get_object(&self, key: &str) -> impl Future<Output = Result<Bytes>> + Send;

    /// Write a whole object, replacing any existing one
    fn put_object(&self, key: &str, data: Bytes) -> impl Future<Output = Result<()>> + Send;
}
