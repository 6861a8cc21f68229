//! Sync protocol frame types.
//!
//! Frames are exchanged between two replicas of one named log until both
//! sides agree on a common head.

use serde::{Deserialize, Serialize};

use replog_core::{Blake3Hash, LogEntry, LogHead};

/// Current protocol version, carried in the first byte of every frame.
pub const PROTOCOL_VERSION: u8 = 0;

/// Fixed frame header: version, tag, round, payload length.
pub const FRAME_HEADER_LEN: usize = 10;

/// Frame size limits, enforced at decode time.
pub mod limits {
    /// Max entries in one Delta.
    pub const MAX_DELTA_ENTRIES: usize = 256;
    /// Max trailing hashes a Summary digest may cover.
    pub const MAX_SUMMARY_WINDOW: u32 = 1024;
    /// Max payload bytes of a single frame.
    pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;
    /// Max length of a Reject reason.
    pub const MAX_REASON_LEN: usize = 512;
    /// Smallest usable frame limit: one maximal entry plus framing.
    pub const MIN_FRAME_BYTES: usize = replog_core::MAX_ENTRY_PAYLOAD + 64 * 1024;
}

/// Wire tag of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    Summary = 0,
    Delta = 1,
    Ack = 2,
    Reject = 3,
}

impl FrameTag {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Summary),
            1 => Some(Self::Delta),
            2 => Some(Self::Ack),
            3 => Some(Self::Reject),
            _ => None,
        }
    }
}

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position of this frame in its session. The opening Summary is round 0.
    pub round: u32,
    pub body: FrameBody,
}

/// Tagged frame contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Summary(Summary),
    Delta(Delta),
    Ack(Ack),
    Reject(Reject),
}

/// Fingerprint of a replica: its head plus a digest over the last `window` hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub head: LogHead,
    /// Number of trailing entries the digest covers.
    pub window: u32,
    pub window_digest: Blake3Hash,
}

/// Entries the receiver is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Contiguous, ascending.
    pub entries: Vec<LogEntry>,
    /// The sender's head at the time of sending.
    pub sender_head: LogHead,
}

/// "Nothing to send."
///
/// `head: None` travels as a zero-length payload and means "my head is
/// what I last told you".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub head: Option<LogHead>,
}

/// "Cannot reconcile."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reject {
    /// Position at which the histories were found to differ.
    pub at_seq: u64,
    pub code: RejectCode,
    pub reason: String,
}

/// Reason codes for Reject frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum RejectCode {
    /// Unknown/unspecified.
    Unknown = 0,
    /// Conflicting entries at the same position.
    Diverged = 1,
}

impl Frame {
    pub fn new(round: u32, body: FrameBody) -> Self {
        Self { round, body }
    }

    pub fn tag(&self) -> FrameTag {
        match &self.body {
            FrameBody::Summary(_) => FrameTag::Summary,
            FrameBody::Delta(_) => FrameTag::Delta,
            FrameBody::Ack(_) => FrameTag::Ack,
            FrameBody::Reject(_) => FrameTag::Reject,
        }
    }

    /// Whether this frame opens a session.
    pub fn is_opening(&self) -> bool {
        self.round == 0 && self.tag() == FrameTag::Summary
    }

    /// Check if this frame respects size and shape limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match &self.body {
            FrameBody::Summary(summary) => {
                if summary.window == 0 || summary.window > limits::MAX_SUMMARY_WINDOW {
                    return Err("summary window out of range");
                }
                if summary.head.is_empty() != summary.head.hash.is_none() {
                    return Err("summary head seq/hash mismatch");
                }
            }
            FrameBody::Delta(delta) => {
                if delta.entries.is_empty() {
                    return Err("empty delta");
                }
                if delta.entries.len() > limits::MAX_DELTA_ENTRIES {
                    return Err("too many entries");
                }
                let first = delta.entries[0].seq();
                if first == 0 {
                    return Err("delta starts at seq 0");
                }
                for (i, entry) in delta.entries.iter().enumerate() {
                    if entry.seq() != first + i as u64 {
                        return Err("delta entries not contiguous");
                    }
                }
                if delta.sender_head.seq < first + delta.entries.len() as u64 - 1 {
                    return Err("delta beyond sender head");
                }
            }
            FrameBody::Ack(_) => {}
            FrameBody::Reject(reject) => {
                if reject.reason.len() > limits::MAX_REASON_LEN {
                    return Err("reject reason too long");
                }
            }
        }
        Ok(())
    }
}
