//! Synthetic-blur corpus builder
//!
//! Reads clean images from `$DEBLUR_SOURCE_DIR/train` and
//! `$DEBLUR_SOURCE_DIR/test`, blurs them and writes framed shards under
//! `$DEBLUR_OUTPUT_DIR/$DEBLUR_PREFIX`.

use deblur_core::storage::LocalStore;
use deblur_core::synth::{self, BlurConfig, BlurSynthesizer, Subset};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| format!("{} has an invalid value '{}'", key, value).into()),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let source = PathBuf::from(std::env::var("DEBLUR_SOURCE_DIR").unwrap_or_else(|_| "clean".into()));
    let output = PathBuf::from(std::env::var("DEBLUR_OUTPUT_DIR").unwrap_or_else(|_| "corpus".into()));
    let prefix = std::env::var("DEBLUR_PREFIX").unwrap_or_else(|_| "cifar".into());

    let defaults = BlurConfig::default();
    let config = BlurConfig {
        max_sigma: env_or("DEBLUR_MAX_SIGMA", defaults.max_sigma)?,
        seed: env_or("DEBLUR_SEED", defaults.seed)?,
        workers: env_or("DEBLUR_SYNTH_WORKERS", defaults.workers)?,
        records_per_shard: env_or("DEBLUR_RECORDS_PER_SHARD", defaults.records_per_shard)?,
    };
    info!("Building blurred corpus from {} with {:?}", source.display(), config);

    let start = Instant::now();
    let synthesizer = Arc::new(BlurSynthesizer::new(config)?);
    let (train, test) = {
        let synthesizer = Arc::clone(&synthesizer);
        tokio::task::spawn_blocking(move || {
            let train = synth::read_image_dir(source.join("train"))?;
            let test = synth::read_image_dir(source.join("test"))?;
            info!("Loaded {} train and {} test images", train.len(), test.len());
            synthesizer.degrade_both(&train, &test)
        })
        .await??
    };

    let store = LocalStore::new(&output);
    for (subset, records) in [(Subset::Train, &train), (Subset::Test, &test)] {
        if records.is_empty() {
            warn!("No {} images found, nothing written for that subset", subset.as_str());
            continue;
        }
        synthesizer.write_subset(&store, &prefix, subset, records).await?;
    }

    info!(
        "Corpus written to {} in {:.2?}",
        output.join(&prefix).display(),
        start.elapsed()
    );
    Ok(())
}
