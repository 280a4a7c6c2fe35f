//! Runtime management for the pipeline
//!
//! A tokio runtime for storage I/O paired with a rayon pool for pixel work.

pub mod executor;

pub use executor::{PipelineRuntime, RuntimeConfig};
