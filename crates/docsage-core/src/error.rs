//! Error types for DocSage.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Length mismatch: {vectors} vectors vs {metadata} metadata entries")]
    LengthMismatch { vectors: usize, metadata: usize },

    #[error("Incompatible index: {0}")]
    IncompatibleIndex(String),

    #[error("Index not found for session {0}")]
    IndexNotFound(String),

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Generation failures may succeed on a later attempt; nothing else does.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::GenerationTimeout(_) | Error::GenerationUnavailable(_)
        )
    }

    /// Failures that mean the index itself can no longer be trusted.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. }
                | Error::LengthMismatch { .. }
                | Error::IncompatibleIndex(_)
                | Error::CorruptIndex(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
