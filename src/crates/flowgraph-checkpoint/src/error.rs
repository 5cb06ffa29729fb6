//! Error types for snapshot operations

use thiserror::Error;

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while encoding, decoding or persisting snapshots
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Snapshot not found
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// A required top-level snapshot field is absent
    #[error("Snapshot is missing required field '{0}'")]
    MissingField(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid snapshot document or saver configuration
    #[error("Invalid snapshot: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
