//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Entry serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A different entry already occupies this position.
    #[error("conflict at seq {seq}: existing entry {existing}")]
    Conflict { seq: u64, existing: String },

    /// Append would leave a gap (or rewrite history below the head).
    #[error("non-contiguous append: expected seq {expected}, got {got}")]
    NonContiguous { expected: u64, got: u64 },

    /// Local write larger than one entry may carry.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// In-memory state lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
