//! Background batch producer
//!
//! Runs on a blocking thread, assembling batches ahead of consumption into a
//! bounded channel. The channel capacity is the prefetch depth.

use tokio::sync::mpsc;
use tracing::debug;

use super::batcher::{Batch, EpochBatcher};
use super::image::Pixel;
use crate::metrics::standard;

/// Producer half of a [`DataLoader`](super::DataLoader)
pub struct Prefetcher<P: Pixel> {
    /// Channel to send batches to the loader
    sender: mpsc::Sender<Batch<P>>,
    /// Source of batches, in delivery order
    batcher: EpochBatcher<P>,
    /// Stream label for logs
    label: &'static str,
}

impl<P: Pixel> Prefetcher<P> {
    pub fn new(sender: mpsc::Sender<Batch<P>>, batcher: EpochBatcher<P>, label: &'static str) -> Self {
        Self {
            sender,
            batcher,
            label,
        }
    }

    /// Run the producer loop until the batcher is exhausted or the
    /// consumer goes away
    ///
    /// Blocks the calling thread on a full channel; must not be called from
    /// inside an async task.
    pub fn run(self) -> u64 {
        let Self {
            sender,
            batcher,
            label,
        } = self;
        debug!("Prefetcher [{}] starting, {} batches queued", label, batcher.remaining());

        let mut produced = 0u64;
        for batch in batcher {
            standard::PREFETCH_PENDING.inc();
            if sender.blocking_send(batch).is_err() {
                standard::PREFETCH_PENDING.dec();
                debug!("Prefetcher [{}]: consumer dropped, stopping", label);
                return produced;
            }
            produced += 1;
            standard::BATCHES_PRODUCED.inc();
        }

        debug!("Prefetcher [{}] completed after {} batches", label, produced);
        produced
    }
}
