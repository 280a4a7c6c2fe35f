//! Error types for the deblur data pipeline
//!
//! Taxonomy covering configuration, decode, shape-consistency, resource
//! and storage failures.

use thiserror::Error;

/// Primary error type for all pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    // ========== Configuration Errors ==========

    /// Listing a prefix returned no objects
    #[error("No objects found under prefix '{prefix}'")]
    EmptyListing { prefix: String },

    /// Image dimensions are not divisible by the patch grid
    #[error("Patch grid {rows}x{cols} does not divide image {height}x{width}")]
    PatchGeometry {
        rows: usize,
        cols: usize,
        height: usize,
        width: usize,
    },

    /// Validation subset would swallow the whole corpus
    #[error("Validation size {validation_size} must be smaller than corpus size {corpus_size}")]
    ValidationSize {
        validation_size: usize,
        corpus_size: usize,
    },

    /// Any other invalid option
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ========== Decode Errors ==========

    /// Record payload does not follow the two-field layout
    #[error("Malformed record: {reason}")]
    MalformedRecord { reason: String },

    /// Image bytes could not be decoded
    #[error("Failed to decode {field} image: {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: image::ImageError,
    },

    /// Image could not be encoded while writing a corpus
    #[error("Failed to encode {field} image: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: image::ImageError,
    },

    /// Checksum mismatch on a framed record
    #[error("Checksum mismatch in {key}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { key: String, expected: u32, actual: u32 },

    // ========== Shape Errors ==========

    /// Two images that must share a shape do not
    #[error("Shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: (usize, usize, usize),
        right: (usize, usize, usize),
    },

    // ========== Resource Errors ==========

    /// Caching the split subsets would exceed the configured budget
    #[error("Cache exhausted: requested {requested} bytes, limit {limit} bytes")]
    CacheExhausted { requested: u64, limit: u64 },

    /// The allocator refused room for a cached subset
    #[error("Failed to allocate cache for {items} items ({requested} bytes of pixels)")]
    CacheAllocation { items: usize, requested: u64 },

    // ========== Storage Errors ==========

    /// Object store operation failed
    #[error("Storage operation failed: {message}")]
    StorageError { message: String },

    /// Object not found in storage
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    // ========== Runtime Errors ==========

    /// Stream has no more batches
    #[error("Data exhausted")]
    DataExhausted,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PipelineError {
    /// Returns true if this error should be reported before training starts
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyListing { .. }
                | PipelineError::PatchGeometry { .. }
                | PipelineError::ValidationSize { .. }
                | PipelineError::InvalidConfig { .. }
        )
    }

    /// Returns true if this error indicates corrupt input data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedRecord { .. }
                | PipelineError::Decode { .. }
                | PipelineError::ChecksumMismatch { .. }
        )
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        PipelineError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        PipelineError::MalformedRecord {
            reason: reason.into(),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
