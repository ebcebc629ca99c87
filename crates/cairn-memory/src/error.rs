//! Error types for the memory crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::validation::ValidationError;
use crate::vector::IndexInconsistency;

/// Errors that can occur in the memory crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Input was rejected before anything was written.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A durable write or read failed.
    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another writer held the store lock for longer than the timeout.
    #[error("Timed out after {0:?} waiting for the store lock")]
    LockTimeout(Duration),

    /// The embedding backend could not produce a vector.
    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The persisted vector index disagrees with the record store.
    #[error("Index inconsistency: {0}")]
    IndexInconsistency(IndexInconsistency),

    /// Requested record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    /// Build a `map_err` adapter that tags an I/O error with its path.
    pub(crate) fn storage(path: &Path) -> impl FnOnce(std::io::Error) -> MemoryError + '_ {
        move |source| MemoryError::Storage {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::LockTimeout(_) | Self::EmbeddingUnavailable(_)
        )
    }
}

impl From<cairn_embed::EmbedError> for MemoryError {
    fn from(err: cairn_embed::EmbedError) -> Self {
        MemoryError::EmbeddingUnavailable(err.to_string())
    }
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
