//! One-time seeded train/validation split
//!
//! The permutation is drawn exactly once per pipeline. Per-epoch reshuffling
//! happens later, inside each subset, and never moves items between subsets.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::image::{ImagePair, Pixel};
use crate::error::{PipelineError, Result};

/// ChaCha8 stream reserved for the split; epoch shuffles use the low streams
const SPLIT_STREAM: u64 = u64::MAX;

/// Corpus indices assigned to each subset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAssignment {
    /// Indices in permuted order, `validation_size` long
    pub validation: Vec<usize>,
    /// Remaining indices in permuted order
    pub train: Vec<usize>,
}

impl SplitAssignment {
    /// Shuffle `0..corpus_size` once with `seed`, cut off the first
    /// `validation_size` indices as validation
    pub fn compute(corpus_size: usize, validation_size: usize, seed: u64) -> Result<Self> {
        if validation_size >= corpus_size {
            return Err(PipelineError::ValidationSize {
                validation_size,
                corpus_size,
            });
        }
        let mut order: Vec<usize> = (0..corpus_size).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(SPLIT_STREAM);
        order.shuffle(&mut rng);

        let train = order.split_off(validation_size);
        Ok(Self {
            validation: order,
            train,
        })
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len()
    }
}

/// Train and validation subsets materialized once and shared read-only
#[derive(Debug, Clone)]
pub struct CachedSplit<P: Pixel> {
    pub train: Arc<[ImagePair<P>]>,
    pub validation: Arc<[ImagePair<P>]>,
}

/// Splits a corpus and caches the two subsets in memory
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    validation_size: usize,
    seed: u64,
    cache_budget_bytes: Option<u64>,
}

impl Splitter {
    pub fn new(validation_size: usize, seed: u64) -> Self {
        Self {
            validation_size,
            seed,
            cache_budget_bytes: None,
        }
    }

    /// Refuse to cache more than `bytes` of pixel data
    ///
    /// Checked against the decoded corpus before the subsets are built, so
    /// it limits what stays resident, not the peak during decode.
    pub fn with_cache_budget(mut self, bytes: Option<u64>) -> Self {
        self.cache_budget_bytes = bytes;
        self
    }

    /// Compute the assignment for a corpus of `corpus_size` items
    pub fn assign(&self, corpus_size: usize) -> Result<SplitAssignment> {
        SplitAssignment::compute(corpus_size, self.validation_size, self.seed)
    }

    /// Split `corpus` and move each item into its cached subset
    pub fn split<P: Pixel>(&self, corpus: Vec<ImagePair<P>>) -> Result<CachedSplit<P>> {
        let assignment = self.assign(corpus.len())?;

        let requested: u64 = corpus.iter().map(|p| p.byte_size() as u64).sum();
        if let Some(limit) = self.cache_budget_bytes {
            if requested > limit {
                return Err(PipelineError::CacheExhausted { requested, limit });
            }
        }

        let mut slots: Vec<Option<ImagePair<P>>> = corpus.into_iter().map(Some).collect();
        let validation = take_subset(&mut slots, &assignment.validation, requested)?;
        let train = take_subset(&mut slots, &assignment.train, requested)?;

        info!(
            "Split corpus of {} into {} train / {} validation ({} MiB cached)",
            assignment.total(),
            train.len(),
            validation.len(),
            requested / (1024 * 1024)
        );

        Ok(CachedSplit {
            train: train.into(),
            validation: validation.into(),
        })
    }
}

fn take_subset<P: Pixel>(
    slots: &mut [Option<ImagePair<P>>],
    indices: &[usize],
    requested: u64,
) -> Result<Vec<ImagePair<P>>> {
    let mut subset = reserve_subset(indices.len(), requested)?;
    for &idx in indices {
        let pair = slots[idx].take().ok_or_else(|| PipelineError::Internal {
            message: format!("corpus index {} assigned twice", idx),
        })?;
        subset.push(pair);
    }
    Ok(subset)
}

fn reserve_subset<T>(items: usize, requested: u64) -> Result<Vec<T>> {
    let mut subset = Vec::new();
    subset
        .try_reserve_exact(items)
        .map_err(|_| PipelineError::CacheAllocation { items, requested })?;
    Ok(subset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image::Image;
    use std::collections::HashSet;

    fn tagged_corpus(n: usize) -> Vec<ImagePair> {
        (0..n)
            .map(|i| {
                let img = Image::from_vec(1, 1, 3, vec![i as f32; 3]).unwrap();
                ImagePair::new(img.clone(), img).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_assignment_partitions_indices() {
        let a = SplitAssignment::compute(100, 10, 7).unwrap();
        assert_eq!(a.validation.len(), 10);
        assert_eq!(a.train.len(), 90);
        let all: HashSet<usize> = a.train.iter().chain(&a.validation).copied().collect();
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn test_validation_too_large() {
        let err = SplitAssignment::compute(10, 10, 0).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_split_moves_tagged_items() {
        let splitter = Splitter::new(3, 42);
        let assignment = splitter.assign(12).unwrap();
        let cached = splitter.split(tagged_corpus(12)).unwrap();
        let tags: Vec<usize> = cached
            .validation
            .iter()
            .map(|p| p.clean().as_slice()[0] as usize)
            .collect();
        assert_eq!(tags, assignment.validation);
        assert_eq!(cached.train.len(), 9);
    }

    #[test]
    fn test_cache_budget_enforced() {
        let splitter = Splitter::new(1, 0).with_cache_budget(Some(8));
        let err = splitter.split(tagged_corpus(4)).unwrap_err();
        assert!(matches!(err, PipelineError::CacheExhausted { .. }));
    }

    #[test]
    fn test_failed_reservation_reports_allocation() {
        let err = reserve_subset::<ImagePair>(usize::MAX, 64).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CacheAllocation { items: usize::MAX, requested: 64 }
        ));
        assert!(!err.is_config_error());
        assert!(reserve_subset::<ImagePair>(4, 64).unwrap().capacity() >= 4);
    }
}
