//! End-to-end pipeline: storage to train, validation and test streams
//!
//! Construction does all one-time work (listing, decode, tiling, the seeded
//! split and caching). Loaders are cheap to create afterwards and share the
//! cached subsets.

use std::sync::Arc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::data::augment::{AugmentConfig, Augmentor};
use crate::data::batcher::{self, BatcherConfig, EpochBatcher, PartialBatch};
use crate::data::dataset::CorpusBuilder;
use crate::data::decode::RecordDecoder;
use crate::data::image::{ImagePair, Pixel};
use crate::data::lister;
use crate::data::loader::DataLoader;
use crate::data::split::{CachedSplit, Splitter};
use crate::error::{PipelineError, Result};
use crate::runtime::PipelineRuntime;
use crate::storage::ObjectStore;

/// The three loaders of a training run
pub struct PipelineStreams<P: Pixel = f32> {
    pub train: DataLoader<P>,
    pub validation: DataLoader<P>,
    pub test: DataLoader<P>,
}

/// Cached subsets plus the configuration to batch them
pub struct DeblurPipeline<P: Pixel = f32> {
    config: PipelineConfig,
    split: CachedSplit<P>,
    test: Arc<[ImagePair<P>]>,
}

impl<P: Pixel> DeblurPipeline<P> {
    /// Build the trainval and test corpora from `store`
    ///
    /// All configuration errors (bad options, empty listings, grid that
    /// does not divide the resolution, oversized validation) surface here.
    pub fn build<S: ObjectStore>(
        runtime: &PipelineRuntime,
        store: Arc<S>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if P::PRECISION != config.precision {
            return Err(PipelineError::invalid_config(format!(
                "configured precision {:?} does not match pixel type {:?}",
                config.precision,
                P::PRECISION
            )));
        }

        let decoder = RecordDecoder::<P>::new(config.resolution);
        let builder = CorpusBuilder::new(store, decoder).with_fetch_concurrency(config.fetch_concurrency);

        let mut trainval = builder.build(runtime, &lister::trainval_prefix(&config.prefix))?;
        if let Some(grid) = config.active_grid() {
            trainval = trainval.tile(grid)?;
        }
        let split = Splitter::new(config.validation_size, config.seed)
            .with_cache_budget(config.cache_budget_bytes)
            .split(trainval.into_pairs())?;

        let test: Arc<[ImagePair<P>]> = builder
            .build(runtime, &lister::test_prefix(&config.prefix))?
            .into_pairs()
            .into();

        let pipeline = Self { config, split, test };
        info!(
            "Pipeline ready: {} train / {} validation / {} test, {} train steps per epoch",
            pipeline.train_len(),
            pipeline.validation_len(),
            pipeline.test_len(),
            pipeline.steps_per_epoch()
        );
        Ok(pipeline)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn train_len(&self) -> usize {
        self.split.train.len()
    }

    pub fn validation_len(&self) -> usize {
        self.split.validation.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.len()
    }

    /// Cached subsets, pre-augmentation
    pub fn cached(&self) -> &CachedSplit<P> {
        &self.split
    }

    /// Train steps per epoch, `train_len / batch_size`
    pub fn steps_per_epoch(&self) -> usize {
        batcher::steps_per_epoch(self.train_len(), self.config.batch_size, PartialBatch::Drop)
    }

    /// Validation steps per epoch, `validation_len / batch_size`
    pub fn validation_steps(&self) -> usize {
        batcher::steps_per_epoch(self.validation_len(), self.config.batch_size, PartialBatch::Drop)
    }

    /// Shuffled, augmented, `epochs` passes
    pub fn train_batcher(&self) -> Result<EpochBatcher<P>> {
        let augmentor = Augmentor::new(AugmentConfig {
            flip_probability: self.config.flip_probability,
            ..Default::default()
        });
        Ok(EpochBatcher::new(
            Arc::clone(&self.split.train),
            BatcherConfig {
                batch_size: self.config.batch_size,
                epochs: self.config.epochs,
                seed: self.config.seed,
                shuffle: true,
                partial: PartialBatch::Drop,
            },
        )?
        .with_augmentor(augmentor))
    }

    /// Shuffled on its own stream, never augmented, `epochs` passes
    pub fn validation_batcher(&self) -> Result<EpochBatcher<P>> {
        EpochBatcher::new(
            Arc::clone(&self.split.validation),
            BatcherConfig {
                batch_size: self.config.batch_size,
                epochs: self.config.epochs,
                seed: self.config.seed.wrapping_add(1),
                shuffle: true,
                partial: PartialBatch::Drop,
            },
        )
    }

    /// Listing order, one pass, final partial batch kept
    pub fn test_batcher(&self) -> Result<EpochBatcher<P>> {
        EpochBatcher::new(
            Arc::clone(&self.test),
            BatcherConfig {
                batch_size: self.config.test_batch_size(),
                epochs: 1,
                seed: self.config.seed,
                shuffle: false,
                partial: PartialBatch::Keep,
            },
        )
    }

    pub fn train_loader(&self, runtime: &PipelineRuntime) -> Result<DataLoader<P>> {
        let batcher = self.train_batcher()?.with_pool(runtime.compute_pool());
        DataLoader::new(runtime, batcher, self.config.prefetch_depth, "train")
    }

    pub fn validation_loader(&self, runtime: &PipelineRuntime) -> Result<DataLoader<P>> {
        DataLoader::new(runtime, self.validation_batcher()?, self.config.prefetch_depth, "validation")
    }

    pub fn test_loader(&self, runtime: &PipelineRuntime) -> Result<DataLoader<P>> {
        DataLoader::new(runtime, self.test_batcher()?, self.config.prefetch_depth, "test")
    }

    /// Start all three loaders
    pub fn streams(&self, runtime: &PipelineRuntime) -> Result<PipelineStreams<P>> {
        Ok(PipelineStreams {
            train: self.train_loader(runtime)?,
            validation: self.validation_loader(runtime)?,
            test: self.test_loader(runtime)?,
        })
    }
}
