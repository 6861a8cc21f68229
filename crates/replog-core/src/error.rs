//! Error types for Replog Core.

use thiserror::Error;

use crate::types::EntryHash;

/// Core errors that can occur during entry operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid writer key")]
    InvalidWriterKey,

    #[error("encoding error: {0}")]
    EncodingError(String),
}

/// Validation errors for entry structure, signatures and chaining.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signature verification failed")]
    SignatureFailed,

    #[error("payload hash does not match header")]
    PayloadHashMismatch,

    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("unsupported entry version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid sequence number: expected {expected}, got {got}")]
    InvalidSequence { expected: u64, got: u64 },

    #[error("invalid prev_hash at seq {seq}: expected {expected:?}, got {got:?}")]
    BrokenChain {
        seq: u64,
        expected: Option<EntryHash>,
        got: Option<EntryHash>,
    },

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidWriterKey => {
                ValidationError::SignatureFailed
            }
            CoreError::EncodingError(msg) => ValidationError::StructuralError(msg),
        }
    }
}
