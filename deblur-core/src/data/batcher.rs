//! Per-epoch reshuffling and fixed-size batching
//!
//! Each epoch draws its shuffle order and its flip decisions from two ChaCha
//! streams derived from `(seed, epoch)`, so a run is reproducible no matter
//! how far ahead the prefetcher gets.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::augment::{self, Augmentor};
use super::image::{ImagePair, Pixel};
use crate::error::{PipelineError, Result};

/// What to do with the trailing items that do not fill a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialBatch {
    /// Drop them; `steps_per_epoch = len / batch_size`
    #[default]
    Drop,
    /// Emit a smaller final batch
    Keep,
}

/// Batches per epoch for a subset of `len` items
pub fn steps_per_epoch(len: usize, batch_size: usize, partial: PartialBatch) -> usize {
    if batch_size == 0 {
        return 0;
    }
    match partial {
        PartialBatch::Drop => len / batch_size,
        PartialBatch::Keep => len.div_ceil(batch_size),
    }
}

/// One training step's worth of pairs
#[derive(Debug, Clone)]
pub struct Batch<P: Pixel = f32> {
    /// Zero-based epoch this batch belongs to
    pub epoch: usize,
    /// Zero-based step within the epoch
    pub step: usize,
    pub pairs: Vec<ImagePair<P>>,
}

impl<P: Pixel> Batch<P> {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `[batch, height, width, channels]`, all pairs share it
    pub fn shape(&self) -> Option<[usize; 4]> {
        let (h, w, c) = self.pairs.first()?.shape();
        Some([self.pairs.len(), h, w, c])
    }

    /// Contiguous NHWC buffers `(degraded, clean)` for model input
    pub fn stack(&self) -> (Vec<P>, Vec<P>) {
        let per_image = self.pairs.first().map_or(0, |p| p.degraded().as_slice().len());
        let mut degraded = Vec::with_capacity(per_image * self.pairs.len());
        let mut clean = Vec::with_capacity(per_image * self.pairs.len());
        for pair in &self.pairs {
            degraded.extend_from_slice(pair.degraded().as_slice());
            clean.extend_from_slice(pair.clean().as_slice());
        }
        (degraded, clean)
    }
}

/// Settings for one stream of batches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatcherConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub seed: u64,
    /// Reshuffle the subset at the start of every epoch
    pub shuffle: bool,
    pub partial: PartialBatch,
}

/// Iterator over the batches of every epoch, in order
pub struct EpochBatcher<P: Pixel> {
    items: Arc<[ImagePair<P>]>,
    config: BatcherConfig,
    augmentor: Option<Augmentor>,
    pool: Option<Arc<rayon::ThreadPool>>,
    epoch: usize,
    step: usize,
    order: Vec<usize>,
    aug_rng: ChaCha8Rng,
}

impl<P: Pixel> EpochBatcher<P> {
    pub fn new(items: Arc<[ImagePair<P>]>, config: BatcherConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(PipelineError::invalid_config("batch_size must be positive"));
        }
        let mut batcher = Self {
            items,
            config,
            augmentor: None,
            pool: None,
            epoch: 0,
            step: 0,
            order: Vec::new(),
            aug_rng: ChaCha8Rng::seed_from_u64(config.seed),
        };
        batcher.start_epoch(0);
        Ok(batcher)
    }

    /// Augment every emitted pair
    pub fn with_augmentor(mut self, augmentor: Augmentor) -> Self {
        self.augmentor = Some(augmentor);
        self
    }

    /// Run per-batch transforms on this pool instead of the global one
    pub fn with_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn steps_per_epoch(&self) -> usize {
        steps_per_epoch(self.items.len(), self.config.batch_size, self.config.partial)
    }

    /// Batches left across all remaining epochs
    pub fn remaining(&self) -> usize {
        if self.epoch >= self.config.epochs {
            return 0;
        }
        let per_epoch = self.steps_per_epoch();
        per_epoch * (self.config.epochs - self.epoch) - self.step.min(per_epoch)
    }

    fn epoch_rng(&self, epoch: usize, stream: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        rng.set_stream(2 * epoch as u64 + stream);
        rng
    }

    fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.step = 0;
        self.order = (0..self.items.len()).collect();
        if self.config.shuffle {
            let mut rng = self.epoch_rng(epoch, 0);
            self.order.shuffle(&mut rng);
        }
        self.aug_rng = self.epoch_rng(epoch, 1);
        if epoch < self.config.epochs {
            debug!(
                "Epoch {}/{}: {} items, {} steps",
                epoch + 1,
                self.config.epochs,
                self.items.len(),
                self.steps_per_epoch()
            );
        }
    }

    fn assemble(&mut self, indices: &[usize]) -> Vec<ImagePair<P>> {
        let Some(augmentor) = self.augmentor else {
            return indices.iter().map(|&i| self.items[i].clone()).collect();
        };
        // decisions are drawn in visiting order before any parallel work
        let decisions = augmentor.draw_many(&mut self.aug_rng, indices.len());
        let items = &self.items;
        let work = || -> Vec<ImagePair<P>> {
            indices
                .par_iter()
                .zip(decisions.par_iter())
                .map(|(&i, &d)| augment::apply(&items[i], d))
                .collect()
        };
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }
}

impl<P: Pixel> Iterator for EpochBatcher<P> {
    type Item = Batch<P>;

    fn next(&mut self) -> Option<Batch<P>> {
        loop {
            if self.epoch >= self.config.epochs {
                return None;
            }
            if self.step < self.steps_per_epoch() {
                break;
            }
            self.start_epoch(self.epoch + 1);
        }

        let start = self.step * self.config.batch_size;
        let end = (start + self.config.batch_size).min(self.order.len());
        let indices = self.order[start..end].to_vec();
        let pairs = self.assemble(&indices);
        let batch = Batch {
            epoch: self.epoch,
            step: self.step,
            pairs,
        };
        self.step += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image::Image;

    fn subset(n: usize) -> Arc<[ImagePair]> {
        (0..n)
            .map(|i| {
                let img = Image::from_vec(1, 2, 3, vec![i as f32; 6]).unwrap();
                ImagePair::new(img.clone(), img).unwrap()
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn config(batch_size: usize, epochs: usize) -> BatcherConfig {
        BatcherConfig {
            batch_size,
            epochs,
            seed: 42,
            shuffle: true,
            partial: PartialBatch::Drop,
        }
    }

    fn tag(pair: &ImagePair) -> usize {
        pair.clean().as_slice()[0] as usize
    }

    #[test]
    fn test_steps_per_epoch() {
        assert_eq!(steps_per_epoch(875, 16, PartialBatch::Drop), 54);
        assert_eq!(steps_per_epoch(875, 16, PartialBatch::Keep), 55);
        assert_eq!(steps_per_epoch(10, 0, PartialBatch::Drop), 0);
    }

    #[test]
    fn test_drop_partial_batches() {
        let batches: Vec<_> = EpochBatcher::new(subset(10), config(4, 3)).unwrap().collect();
        assert_eq!(batches.len(), 6);
        assert!(batches.iter().all(|b| b.len() == 4));
        assert_eq!(batches[2].epoch, 1);
        assert_eq!(batches[2].step, 0);
    }

    #[test]
    fn test_keep_partial_batch() {
        let mut cfg = config(4, 1);
        cfg.partial = PartialBatch::Keep;
        cfg.shuffle = false;
        let batches: Vec<_> = EpochBatcher::new(subset(10), cfg).unwrap().collect();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        let order: Vec<usize> = batches.iter().flat_map(|b| b.pairs.iter().map(tag)).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_each_epoch_is_a_permutation_and_reshuffled() {
        let batches: Vec<_> = EpochBatcher::new(subset(20), config(5, 2)).unwrap().collect();
        let epoch = |e: usize| -> Vec<usize> {
            batches
                .iter()
                .filter(|b| b.epoch == e)
                .flat_map(|b| b.pairs.iter().map(tag))
                .collect()
        };
        let (first, second) = (epoch(0), epoch(1));
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
        assert_ne!(first, second);
    }

    #[test]
    fn test_same_seed_same_stream() {
        let a: Vec<Vec<usize>> = EpochBatcher::new(subset(16), config(4, 2))
            .unwrap()
            .map(|b| b.pairs.iter().map(tag).collect())
            .collect();
        let b: Vec<Vec<usize>> = EpochBatcher::new(subset(16), config(4, 2))
            .unwrap()
            .map(|b| b.pairs.iter().map(tag).collect())
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_size_hint_counts_all_epochs() {
        let mut batcher = EpochBatcher::new(subset(10), config(3, 2)).unwrap();
        assert_eq!(batcher.size_hint(), (6, Some(6)));
        batcher.next();
        assert_eq!(batcher.remaining(), 5);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(EpochBatcher::new(subset(3), config(0, 1)).is_err());
    }
}
