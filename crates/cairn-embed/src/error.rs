//! Error types for the embedding crate.

use thiserror::Error;

/// Result type alias using the embedding error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for embedding operations.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Backend/API error from the provider.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Network/connectivity error (retryable).
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error (API key missing, unknown provider, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The provider returned a vector of the wrong size.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimensions { expected: usize, actual: usize },

    /// The provider is known to be unavailable.
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),
}

impl EmbedError {
    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmbedError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            EmbedError::Network(format!("Connection failed: {}", err))
        } else {
            EmbedError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EmbedError {
    fn from(err: serde_json::Error) -> Self {
        EmbedError::Serialization(err.to_string())
    }
}
