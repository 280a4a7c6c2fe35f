//! Corpus construction from sharded records
//!
//! Shards are fetched concurrently on the I/O runtime, their framed payloads
//! decoded on the compute pool, and the results collected by index so the
//! corpus order is (sorted shard key, record position) regardless of which
//! fetch or decode finished first.

use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::decode::RecordDecoder;
use super::image::{ImagePair, Pixel};
use super::lister::ShardLister;
use super::shard::{Shard, ShardSpec};
use super::tiler::{self, PatchGrid};
use crate::error::{PipelineError, Result};
use crate::metrics::standard;
use crate::runtime::PipelineRuntime;
use crate::storage::ObjectStore;

/// Decoded pairs in deterministic order, plus the shard keys they came from
#[derive(Debug, Clone)]
pub struct Corpus<P: Pixel = f32> {
    pairs: Vec<ImagePair<P>>,
    keys: Vec<String>,
}

impl<P: Pixel> Corpus<P> {
    pub fn new(pairs: Vec<ImagePair<P>>, keys: Vec<String>) -> Self {
        Self { pairs, keys }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[ImagePair<P>] {
        &self.pairs
    }

    /// Source shard keys, sorted
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Pixel bytes held by the corpus
    pub fn byte_size(&self) -> u64 {
        self.pairs.iter().map(|p| p.byte_size() as u64).sum()
    }

    pub fn into_pairs(self) -> Vec<ImagePair<P>> {
        self.pairs
    }

    /// Replace every pair by its `grid.len()` patch pairs, keeping image
    /// order and row-major patch order
    pub fn tile(self, grid: PatchGrid) -> Result<Self> {
        let mut patches = Vec::with_capacity(self.pairs.len() * grid.len());
        for pair in &self.pairs {
            patches.extend(tiler::tile_pair(pair, grid)?);
        }
        debug!(
            "Tiled {} pairs into {} patches ({}x{} grid)",
            self.pairs.len(),
            patches.len(),
            grid.rows,
            grid.cols
        );
        Ok(Self {
            pairs: patches,
            keys: self.keys,
        })
    }
}

/// Builds a [`Corpus`] from the shards under a prefix
pub struct CorpusBuilder<S: ObjectStore, P: Pixel = f32> {
    store: Arc<S>,
    decoder: RecordDecoder<P>,
    fetch_concurrency: usize,
}

impl<S: ObjectStore, P: Pixel> CorpusBuilder<S, P> {
    pub fn new(store: Arc<S>, decoder: RecordDecoder<P>) -> Self {
        Self {
            store,
            decoder,
            fetch_concurrency: crate::DEFAULT_FETCH_CONCURRENCY,
        }
    }

    /// Maximum shard reads in flight
    pub fn with_fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n.max(1);
        self
    }

    /// List, fetch and decode everything under `prefix`
    ///
    /// Blocks the calling thread; I/O runs on the runtime's tokio workers
    /// and decode on its compute pool.
    pub fn build(&self, runtime: &PipelineRuntime, prefix: &str) -> Result<Corpus<P>> {
        let start = Instant::now();
        let shards = runtime.block_on_io(async {
            let specs = ShardLister::new(self.store.as_ref()).list(prefix).await?;
            self.fetch_shards(&specs).await
        })?;
        let pairs = runtime.install(|| self.decode_shards(&shards))?;

        let corpus = Corpus::new(pairs, shards.into_iter().map(|s| s.spec.key).collect());
        info!(
            "Built corpus from '{}': {} pairs from {} shards ({} MiB) in {:.2?}",
            prefix,
            corpus.len(),
            corpus.keys().len(),
            corpus.byte_size() / (1024 * 1024),
            start.elapsed()
        );
        Ok(corpus)
    }

    /// Fetch `specs` with at most `fetch_concurrency` reads in flight,
    /// returning shards in `specs` order
    pub async fn fetch_shards(&self, specs: &[ShardSpec]) -> Result<Vec<Shard>> {
        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency));
        let handles: Vec<_> = specs
            .iter()
            .cloned()
            .map(|spec| {
                let store = Arc::clone(&self.store);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| PipelineError::Internal {
                        message: format!("fetch semaphore closed: {}", e),
                    })?;
                    let data = store.get_object(&spec.key).await?;
                    standard::BYTES_READ.inc_by(data.len() as u64);
                    debug!("Fetched shard {} ({} bytes)", spec.key, data.len());
                    Ok::<_, PipelineError>(Shard::new(spec, data))
                })
            })
            .collect();

        let mut shards = Vec::with_capacity(handles.len());
        for handle in handles {
            let shard = handle.await.map_err(|e| PipelineError::Internal {
                message: format!("shard fetch task failed: {}", e),
            })??;
            shards.push(shard);
        }
        Ok(shards)
    }

    /// Unframe every shard and decode all records in parallel on the
    /// current rayon pool
    ///
    /// The first malformed or undecodable record fails the whole build.
    pub fn decode_shards(&self, shards: &[Shard]) -> Result<Vec<ImagePair<P>>> {
        let mut payloads = Vec::new();
        for shard in shards {
            for record in shard.records() {
                payloads.push(record?);
            }
        }
        payloads
            .into_par_iter()
            .map(|payload| self.decoder.decode_payload(payload))
            .collect()
    }
}
