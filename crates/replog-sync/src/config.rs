//! Sync configuration.

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum entries pushed in one Delta frame.
    pub max_batch_size: usize,
    /// Rounds after which a session is aborted.
    pub max_rounds: u32,
    /// Number of trailing entry hashes covered by a Summary digest.
    pub summary_window: u32,
    /// Whether to verify entry signatures before appending.
    pub validate_entries: bool,
    /// Largest encoded frame accepted or produced. See
    /// [`SyncConfig::effective_frame_bytes`].
    pub max_frame_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_rounds: 1024,
            summary_window: 16,
            validate_entries: true,
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

impl SyncConfig {
    /// Batch size clamped to what a Delta frame may carry.
    pub fn effective_batch_size(&self) -> usize {
        self.max_batch_size
            .clamp(1, crate::messages::limits::MAX_DELTA_ENTRIES)
    }

    /// Frame limit clamped so that a single entry of the largest allowed
    /// payload always fits in one Delta.
    pub fn effective_frame_bytes(&self) -> usize {
        self.max_frame_bytes.clamp(
            crate::messages::limits::MIN_FRAME_BYTES,
            crate::messages::FRAME_HEADER_LEN + crate::messages::limits::MAX_PAYLOAD_BYTES,
        )
    }

    /// Summary window clamped to the wire limit.
    pub fn effective_window(&self) -> u32 {
        self.summary_window
            .clamp(1, crate::messages::limits::MAX_SUMMARY_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.max_rounds, 1024);
        assert!(config.validate_entries);
    }

    #[test]
    fn test_batch_size_clamped() {
        let config = SyncConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_batch_size(), 1);

        let config = SyncConfig {
            max_batch_size: usize::MAX,
            ..Default::default()
        };
        assert_eq!(
            config.effective_batch_size(),
            crate::messages::limits::MAX_DELTA_ENTRIES
        );
    }

    #[test]
    fn test_frame_bytes_clamped() {
        use crate::messages::{limits, FRAME_HEADER_LEN};

        let tiny = SyncConfig {
            max_frame_bytes: 1,
            ..Default::default()
        };
        assert_eq!(tiny.effective_frame_bytes(), limits::MIN_FRAME_BYTES);
        assert!(tiny.effective_frame_bytes() > replog_core::MAX_ENTRY_PAYLOAD);

        let huge = SyncConfig {
            max_frame_bytes: usize::MAX,
            ..Default::default()
        };
        assert_eq!(
            huge.effective_frame_bytes(),
            FRAME_HEADER_LEN + limits::MAX_PAYLOAD_BYTES
        );
        assert_eq!(SyncConfig::default().effective_frame_bytes(), 8 * 1024 * 1024);
    }
}
