//! Runtime executor configuration
//!
//! Provides a tokio runtime for I/O and a separate rayon pool for decode and
//! augmentation so that storage reads never wait behind pixel work.

use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use serde::{Deserialize, Serialize};
use crate::error::{PipelineError, Result};

/// Configuration for the pipeline runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of tokio worker threads for storage I/O
    pub io_threads: usize,
    /// Number of rayon threads for decode and augmentation
    pub compute_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            io_threads: (cpus / 2).max(2),
            compute_threads: cpus.max(2),
        }
    }
}

/// Dual executor for the pipeline
///
/// Separates I/O-bound work (object listing and reads) from CPU-bound work
/// (image decode, resize, flips). Prefetch producers run on the I/O
/// runtime's blocking pool.
pub struct PipelineRuntime {
    /// I/O runtime
    io_runtime: Runtime,
    /// CPU-bound work pool
    compute_pool: Arc<rayon::ThreadPool>,
    config: RuntimeConfig,
}

impl PipelineRuntime {
    /// Create a new runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        if config.io_threads == 0 || config.compute_threads == 0 {
            return Err(PipelineError::invalid_config("runtime thread counts must be positive"));
        }

        let io_runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("deblur-io")
            .enable_all()
            .build()
            .map_err(|e| PipelineError::Internal {
                message: format!("Failed to create I/O runtime: {}", e),
            })?;

        let compute_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.compute_threads)
            .thread_name(|i| format!("deblur-compute-{}", i))
            .build()
            .map_err(|e| PipelineError::Internal {
                message: format!("Failed to create compute pool: {}", e),
            })?;

        Ok(Self {
            io_runtime,
            compute_pool: Arc::new(compute_pool),
            config,
        })
    }

    /// Run a blocking closure on the I/O runtime's blocking pool
    pub fn spawn_blocking<F, R>(&self, f: F) -> tokio::task::JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.io_runtime.spawn_blocking(f)
    }

    /// Run a future on the I/O runtime, blocking until complete
    pub fn block_on_io<F: std::future::Future>(&self, future: F) -> F::Output {
        self.io_runtime.block_on(future)
    }

    /// Run CPU-bound work on the compute pool, blocking until complete
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.compute_pool.install(op)
    }

    /// Shared handle to the compute pool
    pub fn compute_pool(&self) -> Arc<rayon::ThreadPool> {
        Arc::clone(&self.compute_pool)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Graceful shutdown; waits up to 30s for in-flight I/O
    pub fn shutdown(self) {
        self.io_runtime.shutdown_timeout(std::time::Duration::from_secs(30));
    }
}
