//! Deblur Core - paired-image data pipeline for image restoration
//!
//! This crate prepares degraded/clean image pairs for a supervised
//! restoration model:
//! - Sharded record ingestion from object storage
//! - Decode, resize and normalize, optionally to bf16
//! - Lossless patch tiling and reconstruction
//! - Seeded train/validation split and paired flip augmentation
//! - Per-epoch shuffled batches with bounded background prefetch

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod runtime;
pub mod storage;
pub mod synth;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{DeblurPipeline, PipelineStreams};
pub use runtime::PipelineRuntime;

/// Default prefetch depth, in batches per stream
pub const DEFAULT_PREFETCH_DEPTH: usize = 4;

/// Default number of shard reads in flight
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;
