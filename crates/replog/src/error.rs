//! Error types and foreign status codes.

use replog_store::StoreError;
use replog_sync::SyncError;
use thiserror::Error;

use crate::registry::LogHandle;

/// Errors that can occur during registry and bridge operations.
#[derive(Debug, Error)]
pub enum ReplogError {
    /// The handle was never issued or has been released.
    #[error("invalid handle: {0}")]
    InvalidHandle(LogHandle),

    /// Log names must be one plain, non-empty file name.
    #[error("invalid log name: {0:?}")]
    InvalidName(String),

    /// Push-mode call on a handle created without a delivery target.
    #[error("no delivery target registered for handle {0}")]
    NoDeliveryTarget(LogHandle),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Background task or runtime failure.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type for registry and bridge operations.
pub type Result<T> = std::result::Result<T, ReplogError>;

/// Integer status returned across the C boundary.
///
/// Non-negative values are successes; negative values are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    /// A frame was produced and must be delivered.
    Continue = 0,
    /// The session is over and both sides agree.
    Converged = 1,
    InvalidHandle = -1,
    StorageError = -2,
    AlreadySyncing = -3,
    NoSuchSession = -4,
    MalformedFrame = -5,
    UnexpectedRound = -6,
    SessionClosed = -7,
    ProtocolViolation = -8,
    Diverged = -9,
    RoundLimitExceeded = -10,
    InvalidArgument = -11,
    Internal = -12,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl ReplogError {
    /// Map to the status reported at the C boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            ReplogError::InvalidHandle(_) => StatusCode::InvalidHandle,
            ReplogError::InvalidName(_) | ReplogError::NoDeliveryTarget(_) => {
                StatusCode::InvalidArgument
            }
            ReplogError::Store(StoreError::PayloadTooLarge { .. }) => StatusCode::InvalidArgument,
            ReplogError::Store(_) => StatusCode::StorageError,
            ReplogError::Runtime(_) => StatusCode::Internal,
            ReplogError::Sync(e) => match e {
                SyncError::MalformedFrame(_) => StatusCode::MalformedFrame,
                SyncError::UnexpectedRound { .. } => StatusCode::UnexpectedRound,
                SyncError::SessionClosed => StatusCode::SessionClosed,
                SyncError::AlreadySyncing => StatusCode::AlreadySyncing,
                SyncError::NoSuchSession => StatusCode::NoSuchSession,
                SyncError::RoundLimitExceeded { .. } => StatusCode::RoundLimitExceeded,
                SyncError::ProtocolViolation(_) | SyncError::Validation(_) => {
                    StatusCode::ProtocolViolation
                }
                SyncError::Storage(_) => StatusCode::StorageError,
                SyncError::Encoding(_) | SyncError::FrameTooLarge { .. } => StatusCode::Internal,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_distinct() {
        let errors = [
            ReplogError::InvalidHandle(LogHandle::from_raw(7)),
            ReplogError::Sync(SyncError::AlreadySyncing),
            ReplogError::Sync(SyncError::NoSuchSession),
            ReplogError::Sync(SyncError::MalformedFrame("x".into())),
            ReplogError::Sync(SyncError::UnexpectedRound { expected: 1, got: 3 }),
            ReplogError::Sync(SyncError::SessionClosed),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.status().code()).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_storage_errors_share_status() {
        let direct = ReplogError::Store(StoreError::InvalidData("x".into()));
        let via_sync = ReplogError::Sync(SyncError::Storage(StoreError::InvalidData("x".into())));
        assert_eq!(direct.status(), via_sync.status());
        assert_eq!(StatusCode::Diverged.code(), -9);
    }
}
