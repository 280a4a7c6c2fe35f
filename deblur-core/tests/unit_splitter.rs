//! Unit tests for the train/validation split
//!
//! Tests determinism, disjointness and size conservation.

use deblur_core::data::batcher::{BatcherConfig, EpochBatcher, PartialBatch};
use deblur_core::data::image::{Image, ImagePair};
use deblur_core::data::split::{SplitAssignment, Splitter};
use std::collections::HashSet;
use std::sync::Arc;

fn tagged(n: usize) -> Vec<ImagePair> {
    (0..n)
        .map(|i| {
            let img = Image::from_vec(1, 1, 3, vec![i as f32; 3]).unwrap();
            ImagePair::new(img.clone(), img).unwrap()
        })
        .collect()
}

#[test]
fn test_thousand_items_split_875_125() {
    let a = SplitAssignment::compute(1000, 125, 42).unwrap();
    assert_eq!(a.train.len(), 875);
    assert_eq!(a.validation.len(), 125);

    let b = SplitAssignment::compute(1000, 125, 42).unwrap();
    assert_eq!(a, b, "Split should be deterministic");
}

#[test]
fn test_split_is_disjoint_and_complete() {
    let a = SplitAssignment::compute(1000, 125, 42).unwrap();
    let train: HashSet<usize> = a.train.iter().copied().collect();
    let validation: HashSet<usize> = a.validation.iter().copied().collect();

    assert!(train.is_disjoint(&validation));
    assert_eq!(train.len() + validation.len(), 1000);
    assert_eq!(train.union(&validation).count(), 1000);
}

#[test]
fn test_seed_changes_assignment() {
    let a = SplitAssignment::compute(1000, 125, 42).unwrap();
    let b = SplitAssignment::compute(1000, 125, 43).unwrap();
    assert_ne!(a.validation, b.validation);
}

#[test]
fn test_zero_validation_keeps_everything_in_train() {
    let a = SplitAssignment::compute(10, 0, 1).unwrap();
    assert!(a.validation.is_empty());
    assert_eq!(a.train.len(), 10);
}

#[test]
fn test_validation_must_be_smaller_than_corpus() {
    assert!(SplitAssignment::compute(125, 125, 42).is_err());
    assert!(SplitAssignment::compute(0, 0, 42).is_err());
}

#[test]
fn test_cached_subsets_match_assignment() {
    let splitter = Splitter::new(25, 42);
    let assignment = splitter.assign(200).unwrap();
    let cached = splitter.split(tagged(200)).unwrap();

    let tag = |p: &ImagePair| p.clean().as_slice()[0] as usize;
    let train: Vec<usize> = cached.train.iter().map(tag).collect();
    let validation: Vec<usize> = cached.validation.iter().map(tag).collect();
    assert_eq!(train, assignment.train);
    assert_eq!(validation, assignment.validation);
}

#[test]
fn test_split_draws_independent_of_first_epoch_shuffle() {
    let items: Arc<[ImagePair]> = tagged(875).into();
    let mut batcher = EpochBatcher::new(
        items,
        BatcherConfig {
            batch_size: 875,
            epochs: 1,
            seed: 42,
            shuffle: true,
            partial: PartialBatch::Keep,
        },
    )
    .unwrap();
    let epoch_zero: Vec<usize> = batcher
        .next()
        .unwrap()
        .pairs
        .iter()
        .map(|p| p.clean().as_slice()[0] as usize)
        .collect();

    let split = SplitAssignment::compute(875, 0, 42).unwrap();
    let matching = split
        .train
        .iter()
        .zip(&epoch_zero)
        .filter(|(a, b)| a == b)
        .count();
    assert!(matching < 20, "{} of 875 positions coincide", matching);
}
