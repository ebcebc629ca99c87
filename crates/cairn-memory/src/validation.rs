//! Validation utilities for record input.
//!
//! Every check here runs before the store is touched, so a rejected call
//! never leaves a partial write behind.

use crate::types::RecordKind;

/// Longest accepted session identifier.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Longest accepted topic tag.
pub const MAX_TOPIC_LEN: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Validation Error
// ─────────────────────────────────────────────────────────────────────────────

/// Specific validation error types for record data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is empty or whitespace-only.
    #[error("required field '{0}' is empty")]
    EmptyField(&'static str),

    /// Record content contains NUL bytes.
    #[error("field '{0}' contains NUL bytes")]
    BinaryContent(&'static str),

    /// Session ID is empty.
    #[error("session ID is empty")]
    EmptySessionId,

    /// Session ID is too long or contains disallowed characters.
    #[error("session ID is invalid: {0:?}")]
    InvalidSessionId(String),

    /// Turn is negative or does not fit the turn counter.
    #[error("turn {0} is out of range")]
    InvalidTurn(i64),

    /// Topic tag is empty or too long.
    #[error("topic {0:?} is invalid")]
    InvalidTopic(String),

    /// Score is out of the valid range (0.0-1.0).
    #[error("{field} {value} is out of range [0.0, 1.0]")]
    OutOfRange { field: &'static str, value: f32 },

    /// Confidence supplied for a kind that does not carry one.
    #[error("confidence is only tracked for knowledge records, not {0}")]
    ConfidenceNotAllowed(RecordKind),

    /// Embedding dimension mismatch.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding contains invalid values (NaN or Inf).
    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues { count: usize },
}

/// Result alias for validators.
pub type ValidationResult = std::result::Result<(), ValidationError>;

// ─────────────────────────────────────────────────────────────────────────────
// Field Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a required text field.
pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    if value.contains('\0') {
        return Err(ValidationError::BinaryContent(field));
    }
    Ok(())
}

/// Validate an optional text field: absent is fine, present-but-blank is not.
pub fn validate_optional(field: &'static str, value: Option<&str>) -> ValidationResult {
    match value {
        Some(v) => validate_required(field, v),
        None => Ok(()),
    }
}

/// Validate a session identifier.
///
/// Session IDs come from the host assistant (usually UUIDs, sometimes other
/// opaque tokens), so only the shape is checked: non-empty, bounded length,
/// ASCII alphanumerics plus `-`, `_`, `.` and `:`.
pub fn validate_session_id(session_id: &str) -> ValidationResult {
    if session_id.is_empty() {
        return Err(ValidationError::EmptySessionId);
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':');
    if session_id.len() > MAX_SESSION_ID_LEN || !session_id.chars().all(allowed) {
        return Err(ValidationError::InvalidSessionId(session_id.to_string()));
    }

    Ok(())
}

/// Validate a turn number and narrow it to the stored width.
pub fn validate_turn(turn: i64) -> std::result::Result<u32, ValidationError> {
    u32::try_from(turn).map_err(|_| ValidationError::InvalidTurn(turn))
}

/// Validate a topic tag.
pub fn validate_topic(topic: &str) -> ValidationResult {
    let trimmed = topic.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_TOPIC_LEN || trimmed.contains('\0') {
        return Err(ValidationError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Validate a score in the range [0.0, 1.0].
pub fn validate_unit_score(field: &'static str, value: f32) -> ValidationResult {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(())
}

/// Validate an optional confidence against the record kind.
pub fn validate_confidence(kind: RecordKind, confidence: Option<f32>) -> ValidationResult {
    match confidence {
        Some(_) if !kind.is_knowledge() => Err(ValidationError::ConfidenceNotAllowed(kind)),
        Some(value) => validate_unit_score("confidence", value),
        None => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate an embedding vector.
///
/// Checks:
/// 1. Dimension matches expected size
/// 2. No NaN or Inf values
pub fn validate_embedding(embedding: &[f32], expected_dim: usize) -> ValidationResult {
    if embedding.len() != expected_dim {
        return Err(ValidationError::DimensionMismatch {
            expected: expected_dim,
            actual: embedding.len(),
        });
    }

    let invalid_count = embedding.iter().filter(|v| !v.is_finite()).count();
    if invalid_count > 0 {
        return Err(ValidationError::InvalidEmbeddingValues {
            count: invalid_count,
        });
    }

    Ok(())
}
