//! Pipeline throughput probe
//!
//! Builds the pipeline from `DEBLUR_*` variables, drains one pass of every
//! stream and prints the collected metrics. Shards are read from
//! `$DEBLUR_DATA_DIR` when set, otherwise from the S3 endpoint in `S3_*`.

use deblur_core::data::{DataLoader, Pixel, Precision};
use deblur_core::metrics;
use deblur_core::storage::{LocalStore, ObjectStore, S3Client, S3Config};
use deblur_core::{DeblurPipeline, PipelineConfig, PipelineRuntime};
use half::bf16;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn drain<P: Pixel>(mut loader: DataLoader<P>, name: &str) -> deblur_core::Result<()> {
    let start = Instant::now();
    let mut pairs = 0usize;
    let steps = loader.steps_per_epoch();
    for _ in 0..steps {
        pairs += loader.blocking_next_batch()?.len();
    }
    let elapsed = start.elapsed();
    info!(
        "{}: {} batches, {} pairs in {:.2?} ({:.1} pairs/s)",
        name,
        steps,
        pairs,
        elapsed,
        pairs as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}

fn run<S: ObjectStore, P: Pixel>(
    runtime: &PipelineRuntime,
    store: Arc<S>,
    config: PipelineConfig,
) -> deblur_core::Result<()> {
    let pipeline = DeblurPipeline::<P>::build(runtime, store, config)?;
    let streams = pipeline.streams(runtime)?;
    drain(streams.train, "train")?;
    drain(streams.validation, "validation")?;
    drain(streams.test, "test")?;
    Ok(())
}

fn run_with_store<S: ObjectStore>(
    runtime: &PipelineRuntime,
    store: Arc<S>,
    config: PipelineConfig,
) -> deblur_core::Result<()> {
    match config.precision {
        Precision::F32 => run::<S, f32>(runtime, store, config),
        Precision::Bf16 => run::<S, bf16>(runtime, store, config),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PipelineConfig::from_env()?;
    info!("Pipeline config: {:?}", config);
    let runtime = PipelineRuntime::new(config.runtime_config())?;

    match std::env::var("DEBLUR_DATA_DIR") {
        Ok(dir) => {
            info!("Reading shards from {}", dir);
            run_with_store(&runtime, Arc::new(LocalStore::new(dir)), config)?;
        }
        Err(_) => {
            let s3_config = S3Config::from_env();
            info!("Reading shards from {}/{}", s3_config.endpoint, s3_config.bucket);
            run_with_store(&runtime, Arc::new(S3Client::new(s3_config)?), config)?;
        }
    }

    print!("{}", metrics::gather_pipeline_metrics());
    runtime.shutdown();
    Ok(())
}
