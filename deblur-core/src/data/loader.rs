//! Batch loader
//!
//! Consumer side of the prefetch channel. One loader per stream (train,
//! validation, test); all three yield the same [`Batch`] type.

use tokio::sync::mpsc;
use tracing::debug;

use super::batcher::{Batch, EpochBatcher};
use super::image::Pixel;
use super::prefetcher::Prefetcher;
use crate::error::{PipelineError, Result};
use crate::metrics::standard;
use crate::runtime::PipelineRuntime;

/// Prefetching loader over an [`EpochBatcher`]
///
/// Batches are assembled on the runtime's blocking pool while the caller
/// works on the current one; at most `prefetch_depth` finished batches wait
/// in the channel. Dropping the loader stops the producer at its next send.
pub struct DataLoader<P: Pixel = f32> {
    /// Channel to receive batches from the prefetcher
    receiver: mpsc::Receiver<Batch<P>>,
    steps_per_epoch: usize,
    total_batches: usize,
    /// Total batches handed to the caller
    batches_loaded: u64,
    /// Task handle for the prefetcher
    prefetch_handle: Option<tokio::task::JoinHandle<u64>>,
    label: &'static str,
}

impl<P: Pixel> DataLoader<P> {
    /// Start prefetching `batcher` on `runtime`
    pub fn new(
        runtime: &PipelineRuntime,
        batcher: EpochBatcher<P>,
        prefetch_depth: usize,
        label: &'static str,
    ) -> Result<Self> {
        if prefetch_depth == 0 {
            return Err(PipelineError::invalid_config("prefetch_depth must be positive"));
        }
        let (sender, receiver) = mpsc::channel(prefetch_depth);
        let steps_per_epoch = batcher.steps_per_epoch();
        let total_batches = batcher.remaining();

        let prefetcher = Prefetcher::new(sender, batcher, label);
        let prefetch_handle = runtime.spawn_blocking(move || prefetcher.run());

        Ok(Self {
            receiver,
            steps_per_epoch,
            total_batches,
            batches_loaded: 0,
            prefetch_handle: Some(prefetch_handle),
            label,
        })
    }

    /// Get the next batch, `DataExhausted` once every epoch has been served
    pub async fn next_batch(&mut self) -> Result<Batch<P>> {
        let batch = self.receiver.recv().await;
        self.record(batch).ok_or(PipelineError::DataExhausted)
    }

    /// Synchronous variant of [`next_batch`](Self::next_batch) for plain
    /// training loops
    ///
    /// Panics if called from within an async execution context.
    pub fn blocking_next_batch(&mut self) -> Result<Batch<P>> {
        let batch = self.receiver.blocking_recv();
        self.record(batch).ok_or(PipelineError::DataExhausted)
    }

    /// Take a batch only if one is already prefetched
    pub fn try_next_batch(&mut self) -> Option<Batch<P>> {
        let batch = self.receiver.try_recv().ok();
        self.record(batch)
    }

    fn record(&mut self, batch: Option<Batch<P>>) -> Option<Batch<P>> {
        if batch.is_some() {
            standard::PREFETCH_PENDING.dec();
            self.batches_loaded += 1;
        }
        batch
    }

    pub fn batches_loaded(&self) -> u64 {
        self.batches_loaded
    }

    /// Batches per epoch; what a training loop should use as its step count
    pub fn steps_per_epoch(&self) -> usize {
        self.steps_per_epoch
    }

    /// Batches over the whole run
    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    /// Batches prefetched and waiting
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    fn release_pending(&mut self) {
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {
            standard::PREFETCH_PENDING.dec();
        }
    }

    /// Stop the prefetcher and wait for it to exit
    pub async fn shutdown(mut self) {
        self.release_pending();
        if let Some(handle) = self.prefetch_handle.take() {
            let _ = handle.await;
        }
        debug!(
            "DataLoader [{}] shutdown complete, loaded {} batches",
            self.label, self.batches_loaded
        );
    }
}

impl<P: Pixel> Iterator for DataLoader<P> {
    type Item = Batch<P>;

    /// Blocking; see [`DataLoader::blocking_next_batch`]
    fn next(&mut self) -> Option<Batch<P>> {
        self.blocking_next_batch().ok()
    }
}

impl<P: Pixel> Drop for DataLoader<P> {
    fn drop(&mut self) {
        self.release_pending();
    }
}
