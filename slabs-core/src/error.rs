//! Error types for the slab pipeline
//!
//! One taxonomy for every stage of a batch: storage, payload decoding,
//! volume assembly, crop sampling and configuration. Every error fails
//! the whole batch it occurred in.

use thiserror::Error;

/// Primary error type for all slab loading operations
#[derive(Debug, Error)]
pub enum SlabError {
    // ========== Storage Errors ==========

    /// Query against the backing store failed
    #[error("Storage query failed: {message}")]
    Storage { message: String },

    /// Could not reach the backing store
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    // ========== Decode Errors ==========

    /// Payload bytes could not be turned into an array
    #[error("Failed to decode field '{field}': {reason}")]
    Decode { field: String, reason: String },

    /// A configured field is absent from a record
    #[error("Record is missing field '{field}'")]
    MissingField { field: String },

    /// A field holds a value of the wrong kind
    #[error("Field '{field}' has unexpected type: expected {expected}, found {found}")]
    UnexpectedFieldType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    // ========== Assembly Errors ==========

    /// Shards of a subject do not stack into a full volume
    #[error("Shard set for subject {subject} is inconsistent: {reason}")]
    ShapeMismatch { subject: String, reason: String },

    /// Volume has no dynamic range, min-max scaling is undefined
    #[error("Volume for subject {subject} is degenerate (min={min}, max={max})")]
    DegenerateVolume { subject: String, min: f32, max: f32 },

    /// Nothing to assemble
    #[error("Batch contains no records")]
    EmptyBatch,

    // ========== Sampling Errors ==========

    /// Coordinate generator produced a window that does not fit
    #[error("Crop {coords} does not fit volume {volume:?} with crop shape {crop:?}")]
    CropOutOfBounds {
        coords: String,
        volume: [usize; 3],
        crop: [usize; 3],
    },

    // ========== Data Errors ==========

    /// Batch index outside the dataset
    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// All batches of the current epoch have been consumed
    #[error("Data exhausted for current epoch")]
    EpochExhausted,

    // ========== Configuration Errors ==========

    /// Configuration rejected by validation
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Configuration file could not be read or parsed
    #[error("Failed to load configuration from {path}: {reason}")]
    ConfigLoad { path: String, reason: String },

    // ========== Runtime Errors ==========

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SlabError {
    /// Returns true if the error came from the backing store
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            SlabError::Storage { .. } | SlabError::ConnectionFailed { .. }
        )
    }

    /// Returns true if the records themselves are bad, as opposed to the
    /// transport or configuration
    pub fn is_data_corruption(&self) -> bool {
        matches!(
            self,
            SlabError::Decode { .. }
                | SlabError::MissingField { .. }
                | SlabError::UnexpectedFieldType { .. }
                | SlabError::ShapeMismatch { .. }
                | SlabError::DegenerateVolume { .. }
        )
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        SlabError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn shape_mismatch(subject: impl ToString, reason: impl Into<String>) -> Self {
        SlabError::ShapeMismatch {
            subject: subject.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for slab operations
pub type Result<T> = std::result::Result<T, SlabError>;
