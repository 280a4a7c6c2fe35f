//! Data pipeline
//!
//! Listing, decoding, tiling, splitting, augmentation and prefetched
//! batching of paired images.

pub mod augment;
pub mod batcher;
pub mod dataset;
pub mod decode;
pub mod image;
pub mod lister;
pub mod loader;
pub mod prefetcher;
pub mod record;
pub mod shard;
pub mod split;
pub mod tiler;

pub use augment::{AugmentConfig, Augmentor, FlipDecision};
pub use batcher::{Batch, BatcherConfig, EpochBatcher, PartialBatch};
pub use dataset::{Corpus, CorpusBuilder};
pub use decode::RecordDecoder;
pub use self::image::{Image, ImagePair, Pixel, Precision};
pub use lister::ShardLister;
pub use loader::DataLoader;
pub use prefetcher::Prefetcher;
pub use record::PairRecord;
pub use shard::{RecordReader, Shard, ShardSpec, ShardWriter};
pub use split::{CachedSplit, SplitAssignment, Splitter};
pub use tiler::{reconstruct, tile, PatchGrid};
