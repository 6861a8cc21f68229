//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur while reconciling two replicas.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Frame length, tag, version or payload are inconsistent.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame arrived out of order or was replayed.
    #[error("unexpected round: expected {expected}, got {got}")]
    UnexpectedRound { expected: u32, got: u32 },

    /// Session already reached a terminal state.
    #[error("session closed")]
    SessionClosed,

    /// A session with this peer is already active.
    #[error("already syncing with peer")]
    AlreadySyncing,

    /// No active session with this peer.
    #[error("no such session")]
    NoSuchSession,

    /// Session ran past the configured round bound.
    #[error("round limit exceeded: {limit}")]
    RoundLimitExceeded { limit: u32 },

    /// Well-formed frame that breaks the exchange rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Outbound frame would not fit the frame limit.
    #[error("outbound frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// Frame could not be serialized.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Storage(#[from] replog_store::StoreError),

    /// Entry validation failed.
    #[error("validation error: {0}")]
    Validation(#[from] replog_core::ValidationError),
}

impl SyncError {
    /// Whether the error was caused by the peer's frames rather than local state.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedFrame(_)
                | SyncError::UnexpectedRound { .. }
                | SyncError::RoundLimitExceeded { .. }
                | SyncError::ProtocolViolation(_)
                | SyncError::Validation(_)
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
