//! Pipeline configuration
//!
//! Loaded from JSON or `DEBLUR_*` environment variables and validated
//! before any shard is listed.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::data::image::Precision;
use crate::data::tiler::PatchGrid;
use crate::error::{PipelineError, Result};
use crate::runtime::RuntimeConfig;

/// Everything needed to build the train, validation and test streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Storage prefix; shards live under `{prefix}/train*` and `{prefix}/test*`
    pub prefix: String,
    /// Target `(height, width)` of decoded images
    pub resolution: (u32, u32),
    pub batch_size: usize,
    pub epochs: usize,
    pub seed: u64,
    /// Items taken from the shuffled trainval corpus for validation
    pub validation_size: usize,
    /// Tile trainval images into `patch_grid` patches
    pub use_patches: bool,
    /// Required when `use_patches` is set
    pub patch_grid: Option<PatchGrid>,
    /// Pixel storage type
    pub precision: Precision,
    /// Finished batches buffered ahead of the consumer, per stream
    pub prefetch_depth: usize,
    /// Threads on the compute pool
    pub decode_workers: usize,
    /// Shard reads in flight
    pub fetch_concurrency: usize,
    pub flip_probability: f32,
    /// Upper bound on cached trainval pixel bytes, checked after decode
    pub cache_budget_bytes: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefix: "reds".into(),
            resolution: (288, 512),
            batch_size: 16,
            epochs: 1,
            seed: 42,
            validation_size: 0,
            use_patches: false,
            patch_grid: None,
            precision: Precision::F32,
            prefetch_depth: crate::DEFAULT_PREFETCH_DEPTH,
            decode_workers: num_cpus::get().max(1),
            fetch_concurrency: crate::DEFAULT_FETCH_CONCURRENCY,
            flip_probability: 0.5,
            cache_budget_bytes: None,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::invalid_config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            PipelineError::invalid_config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DEBLUR_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `DEBLUR_*` name
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key);

        if let Some(prefix) = get("DEBLUR_PREFIX") {
            config.prefix = prefix;
        }
        override_parsed(&get, "DEBLUR_HEIGHT", &mut config.resolution.0)?;
        override_parsed(&get, "DEBLUR_WIDTH", &mut config.resolution.1)?;
        override_parsed(&get, "DEBLUR_BATCH_SIZE", &mut config.batch_size)?;
        override_parsed(&get, "DEBLUR_EPOCHS", &mut config.epochs)?;
        override_parsed(&get, "DEBLUR_SEED", &mut config.seed)?;
        override_parsed(&get, "DEBLUR_VALIDATION_SIZE", &mut config.validation_size)?;
        override_parsed(&get, "DEBLUR_USE_PATCHES", &mut config.use_patches)?;
        override_parsed(&get, "DEBLUR_PREFETCH_DEPTH", &mut config.prefetch_depth)?;
        override_parsed(&get, "DEBLUR_DECODE_WORKERS", &mut config.decode_workers)?;
        override_parsed(&get, "DEBLUR_FETCH_CONCURRENCY", &mut config.fetch_concurrency)?;
        override_parsed(&get, "DEBLUR_FLIP_PROBABILITY", &mut config.flip_probability)?;

        if let Some(budget) = get("DEBLUR_CACHE_BUDGET_BYTES") {
            config.cache_budget_bytes = Some(parse("DEBLUR_CACHE_BUDGET_BYTES", &budget)?);
        }
        if let Some(precision) = get("DEBLUR_PRECISION") {
            config.precision = match precision.to_ascii_lowercase().as_str() {
                "f32" => Precision::F32,
                "bf16" => Precision::Bf16,
                other => {
                    return Err(PipelineError::invalid_config(format!(
                        "DEBLUR_PRECISION must be f32 or bf16, got '{}'",
                        other
                    )))
                }
            };
        }
        match (get("DEBLUR_PATCH_ROWS"), get("DEBLUR_PATCH_COLS")) {
            (Some(rows), Some(cols)) => {
                config.patch_grid = Some(PatchGrid::new(
                    parse("DEBLUR_PATCH_ROWS", &rows)?,
                    parse("DEBLUR_PATCH_COLS", &cols)?,
                ));
            }
            (None, None) => {}
            _ => {
                return Err(PipelineError::invalid_config(
                    "DEBLUR_PATCH_ROWS and DEBLUR_PATCH_COLS must be set together",
                ))
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a single batch
    pub fn validate(&self) -> Result<()> {
        let (height, width) = self.resolution;
        if height == 0 || width == 0 {
            return Err(PipelineError::invalid_config("resolution must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::invalid_config("batch_size must be positive"));
        }
        if self.epochs == 0 {
            return Err(PipelineError::invalid_config("epochs must be positive"));
        }
        if self.prefetch_depth == 0 {
            return Err(PipelineError::invalid_config("prefetch_depth must be positive"));
        }
        if self.decode_workers == 0 || self.fetch_concurrency == 0 {
            return Err(PipelineError::invalid_config(
                "decode_workers and fetch_concurrency must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.flip_probability) {
            return Err(PipelineError::invalid_config(format!(
                "flip_probability must be within [0, 1], got {}",
                self.flip_probability
            )));
        }
        if self.use_patches {
            let grid = self.patch_grid.ok_or_else(|| {
                PipelineError::invalid_config("patch_grid is required when use_patches is set")
            })?;
            grid.patch_size(height as usize, width as usize)?;
        }
        Ok(())
    }

    /// Grid to tile with, `None` when tiling is off
    pub fn active_grid(&self) -> Option<PatchGrid> {
        self.patch_grid.filter(|_| self.use_patches)
    }

    /// Runtime sized for this pipeline: `decode_workers` compute threads
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            compute_threads: self.decode_workers,
            ..RuntimeConfig::default()
        }
    }

    /// Batch size of the test stream: whole images one at a time when
    /// tiling is on, so predictions can be stitched per image
    pub fn test_batch_size(&self) -> usize {
        if self.use_patches {
            1
        } else {
            self.batch_size
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PipelineError::invalid_config(format!("{}='{}': {}", key, value, e)))
}

fn override_parsed<T, G>(get: &G, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(key) {
        *slot = parse(key, &value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_patches_require_grid() {
        let config = PipelineConfig {
            use_patches: true,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());

        let config = PipelineConfig {
            use_patches: true,
            patch_grid: Some(PatchGrid::new(3, 4)),
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.test_batch_size(), 1);
    }

    #[test]
    fn test_grid_must_divide_resolution() {
        let config = PipelineConfig {
            use_patches: true,
            patch_grid: Some(PatchGrid::new(5, 4)),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::PatchGeometry { .. }));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("DEBLUR_PREFIX", "gopro"),
            ("DEBLUR_BATCH_SIZE", "8"),
            ("DEBLUR_USE_PATCHES", "true"),
            ("DEBLUR_PATCH_ROWS", "2"),
            ("DEBLUR_PATCH_COLS", "2"),
            ("DEBLUR_PRECISION", "BF16"),
            ("DEBLUR_CACHE_BUDGET_BYTES", "1048576"),
        ]))
        .unwrap();
        assert_eq!(config.prefix, "gopro");
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.active_grid(), Some(PatchGrid::new(2, 2)));
        assert_eq!(config.precision, Precision::Bf16);
        assert_eq!(config.cache_budget_bytes, Some(1 << 20));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = PipelineConfig::from_lookup(lookup(&[("DEBLUR_EPOCHS", "many")])).unwrap_err();
        assert!(err.is_config_error());
        let err = PipelineConfig::from_lookup(lookup(&[("DEBLUR_PATCH_ROWS", "2")])).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_json_file_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"prefix": "cifar", "resolution": [32, 32], "validation_size": 5000}"#,
        )
        .unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.resolution, (32, 32));
        assert_eq!(config.validation_size, 5000);
        assert_eq!(config.batch_size, PipelineConfig::default().batch_size);
    }
}
