//! Offline synthetic-blur corpus construction
//!
//! Turns clean RGB images into `(blurred, clean)` records and writes them as
//! framed shards under `{prefix}/train-*` and `{prefix}/test-*`, the layout
//! [`DeblurPipeline`](crate::pipeline::DeblurPipeline) reads back.
//!
//! Every image draws its blur sigma from its own ChaCha8 stream keyed by
//! `(seed, subset, index)`, so the output does not depend on how the worker
//! pool schedules tasks.

use bytes::Bytes;
use image::RgbImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::data::record::PairRecord;
use crate::data::shard::ShardWriter;
use crate::error::{PipelineError, Result};
use crate::storage::ObjectStore;

/// Which half of the corpus an image belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subset {
    Train,
    Test,
}

impl Subset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Test => "test",
        }
    }

    fn stream_id(&self) -> u64 {
        match self {
            Subset::Train => 0,
            Subset::Test => 1,
        }
    }
}

/// Settings for blur synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurConfig {
    /// Sigma is drawn uniformly from `[0, max_sigma)`
    pub max_sigma: f32,
    pub seed: u64,
    /// Worker threads in the synthesis pool
    pub workers: usize,
    /// Records per written shard
    pub records_per_shard: usize,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            max_sigma: 3.0,
            seed: 42,
            workers: 2,
            records_per_shard: 256,
        }
    }
}

/// Sigma for image `index` of `subset`
pub fn blur_sigma(seed: u64, subset: Subset, index: usize, max_sigma: f32) -> f32 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream((subset.stream_id() << 32) | index as u64);
    if max_sigma <= 0.0 {
        return 0.0;
    }
    rng.random_range(0.0..max_sigma)
}

/// Gaussian blur; a non-positive sigma returns the image unchanged
pub fn degrade(clean: &RgbImage, sigma: f32) -> RgbImage {
    if sigma <= 0.0 {
        return clean.clone();
    }
    image::imageops::blur(clean, sigma)
}

/// Encode as PNG
pub fn encode_png(img: &RgbImage, field: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|source| PipelineError::Encode { field, source })?;
    Ok(buf)
}

/// Read every PNG/JPEG under `dir` in sorted path order
pub fn read_image_dir(dir: impl AsRef<Path>) -> Result<Vec<RgbImage>> {
    let dir = dir.as_ref();
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| PipelineError::StorageError {
            message: format!("walking {}: {}", dir.display(), e),
        })?;
        let is_image = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_image {
            paths.push(entry.into_path());
        }
    }

    paths
        .par_iter()
        .map(|path| {
            image::open(path)
                .map(|img| img.to_rgb8())
                .map_err(|source| PipelineError::Decode { field: "clean", source })
        })
        .collect()
}

/// Blurs clean images into paired records on a fixed-size pool
pub struct BlurSynthesizer {
    config: BlurConfig,
    pool: rayon::ThreadPool,
}

impl BlurSynthesizer {
    pub fn new(config: BlurConfig) -> Result<Self> {
        if config.workers == 0 || config.records_per_shard == 0 {
            return Err(PipelineError::invalid_config(
                "workers and records_per_shard must be positive",
            ));
        }
        if !config.max_sigma.is_finite() || config.max_sigma < 0.0 {
            return Err(PipelineError::invalid_config(format!(
                "max_sigma must be finite and non-negative, got {}",
                config.max_sigma
            )));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("deblur-synth-{}", i))
            .build()
            .map_err(|e| PipelineError::Internal {
                message: format!("Failed to create synthesis pool: {}", e),
            })?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &BlurConfig {
        &self.config
    }

    /// Blur one subset; record `i` always comes from `images[i]`
    pub fn degrade_subset(&self, subset: Subset, images: &[RgbImage]) -> Result<Vec<PairRecord>> {
        self.pool.install(|| self.degrade_in_current_pool(subset, images))
    }

    fn degrade_in_current_pool(&self, subset: Subset, images: &[RgbImage]) -> Result<Vec<PairRecord>> {
        let start = Instant::now();
        let records: Result<Vec<PairRecord>> = images
            .par_iter()
            .enumerate()
            .map(|(index, clean)| {
                let sigma = blur_sigma(self.config.seed, subset, index, self.config.max_sigma);
                let blurred = degrade(clean, sigma);
                Ok(PairRecord::new(
                    encode_png(&blurred, "degraded")?,
                    encode_png(clean, "clean")?,
                ))
            })
            .collect();
        debug!(
            "Blurred {} {} images in {:.2?}",
            images.len(),
            subset.as_str(),
            start.elapsed()
        );
        records
    }

    /// Blur train and test concurrently on the pool
    pub fn degrade_both(
        &self,
        train: &[RgbImage],
        test: &[RgbImage],
    ) -> Result<(Vec<PairRecord>, Vec<PairRecord>)> {
        let (train, test) = self.pool.install(|| {
            rayon::join(
                || self.degrade_in_current_pool(Subset::Train, train),
                || self.degrade_in_current_pool(Subset::Test, test),
            )
        });
        Ok((train?, test?))
    }

    /// Frame records into shard bodies of `records_per_shard` each
    pub fn shard_bodies(&self, records: &[PairRecord]) -> Result<Vec<Bytes>> {
        records
            .chunks(self.config.records_per_shard)
            .map(|chunk| {
                let mut writer = ShardWriter::new();
                for record in chunk {
                    writer.push(&record.encode()?);
                }
                Ok(writer.finish())
            })
            .collect()
    }

    /// Write a subset's shards as `{prefix}/{subset}-NNNNN.rec`, returning
    /// the written keys
    pub async fn write_subset<S: ObjectStore>(
        &self,
        store: &S,
        prefix: &str,
        subset: Subset,
        records: &[PairRecord],
    ) -> Result<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let mut keys = Vec::new();
        for (i, body) in self.shard_bodies(records)?.into_iter().enumerate() {
            let key = format!("{}/{}-{:05}.rec", prefix, subset.as_str(), i);
            store.put_object(&key, body).await?;
            keys.push(key);
        }
        info!(
            "Wrote {} {} records as {} shards under '{}'",
            records.len(),
            subset.as_str(),
            keys.len(),
            prefix
        );
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::decode::RecordDecoder;
    use crate::data::shard::RecordReader;

    fn checker(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        })
    }

    fn synthesizer(workers: usize) -> BlurSynthesizer {
        BlurSynthesizer::new(BlurConfig {
            workers,
            records_per_shard: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_sigma_streams_are_independent_and_bounded() {
        let a = blur_sigma(42, Subset::Train, 0, 3.0);
        assert_eq!(a, blur_sigma(42, Subset::Train, 0, 3.0));
        assert_ne!(a, blur_sigma(42, Subset::Test, 0, 3.0));
        assert!((0..100).all(|i| (0.0..3.0).contains(&blur_sigma(7, Subset::Train, i, 3.0))));
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let img = checker(8);
        assert_eq!(degrade(&img, 0.0), img);
        assert_ne!(degrade(&img, 2.0), img);
    }

    #[test]
    fn test_output_independent_of_worker_count() {
        let images: Vec<RgbImage> = (0..5).map(|i| checker(8 + i)).collect();
        let one = synthesizer(1).degrade_subset(Subset::Train, &images).unwrap();
        let four = synthesizer(4).degrade_subset(Subset::Train, &images).unwrap();
        assert_eq!(one, four);
    }

    #[test]
    fn test_records_decode_back_in_order() {
        let images: Vec<RgbImage> = (0..3).map(|i| checker(4 + 2 * i)).collect();
        let synth = synthesizer(2);
        let (train, test) = synth.degrade_both(&images, &images[..1]).unwrap();
        assert_eq!((train.len(), test.len()), (3, 1));

        let bodies = synth.shard_bodies(&train).unwrap();
        assert_eq!(bodies.len(), 2);
        let decoder = RecordDecoder::<f32>::new((4, 4));
        let first = RecordReader::new("train-0", bodies[0].clone())
            .next()
            .unwrap()
            .unwrap();
        let pair = decoder.decode_payload(first).unwrap();
        assert_eq!(pair.clean().as_slice()[0], 1.0);
    }
}
