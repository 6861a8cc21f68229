//! Digest codec: deterministic encode/decode of protocol frames.
//!
//! Frame layout:
//!
//! ```text
//! offset 0  u8   protocol version
//! offset 1  u8   tag (0 Summary, 1 Delta, 2 Ack, 3 Reject)
//! offset 2  u32  round (big-endian)
//! offset 6  u32  payload length (big-endian)
//! offset 10 ...  payload, exactly `payload length` bytes of CBOR
//! ```
//!
//! An Ack with a zero-length payload is valid and carries no head.

use serde::de::DeserializeOwned;
use serde::Serialize;

use replog_core::{LogEntry, LogHead};

use crate::digest::LogView;
use crate::error::{Result, SyncError};
use crate::messages::{
    limits, Ack, Delta, Frame, FrameBody, FrameTag, Reject, RejectCode, FRAME_HEADER_LEN,
    PROTOCOL_VERSION,
};

/// Upper bound on what a Delta adds to the wire beyond its entries' own
/// encodings: payload framing plus the sender head.
pub const DELTA_ENVELOPE_BYTES: usize = 256;

/// Encode a frame to wire bytes.
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    let payload = match &frame.body {
        FrameBody::Summary(summary) => to_cbor(summary)?,
        FrameBody::Delta(delta) => to_cbor(delta)?,
        FrameBody::Ack(Ack { head: None }) => Vec::new(),
        FrameBody::Ack(Ack { head: Some(head) }) => to_cbor(head)?,
        FrameBody::Reject(reject) => to_cbor(reject)?,
    };

    if payload.len() > limits::MAX_PAYLOAD_BYTES {
        return Err(SyncError::Encoding(format!(
            "payload of {} bytes exceeds limit",
            payload.len()
        )));
    }

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(frame.tag().to_u8());
    buf.extend_from_slice(&frame.round.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Number of bytes `entry` occupies inside an encoded Delta.
pub fn encoded_entry_len(entry: &LogEntry) -> Result<usize> {
    Ok(to_cbor(entry)?.len())
}

/// Encode the Summary of a captured log view.
pub fn encode_summary(view: &LogView, round: u32) -> Result<Vec<u8>> {
    encode(&Frame::new(round, FrameBody::Summary(view.summary())))
}

/// Encode entries the peer is missing.
pub fn encode_delta(entries: Vec<LogEntry>, sender_head: LogHead, round: u32) -> Result<Vec<u8>> {
    encode(&Frame::new(
        round,
        FrameBody::Delta(Delta {
            entries,
            sender_head,
        }),
    ))
}

/// Encode an Ack. `None` produces the zero-length form.
pub fn encode_ack(head: Option<LogHead>, round: u32) -> Result<Vec<u8>> {
    encode(&Frame::new(round, FrameBody::Ack(Ack { head })))
}

/// Encode a divergence report.
pub fn encode_reject(at_seq: u64, reason: impl Into<String>, round: u32) -> Result<Vec<u8>> {
    encode(&Frame::new(
        round,
        FrameBody::Reject(Reject {
            at_seq,
            code: RejectCode::Diverged,
            reason: reason.into(),
        }),
    ))
}

/// Decode wire bytes into a frame.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    decode_bounded(bytes, FRAME_HEADER_LEN + limits::MAX_PAYLOAD_BYTES)
}

/// Decode wire bytes, refusing frames longer than `max_frame_bytes`.
pub fn decode_bounded(bytes: &[u8], max_frame_bytes: usize) -> Result<Frame> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(malformed(format!("short header: {} bytes", bytes.len())));
    }
    if bytes.len() > max_frame_bytes {
        return Err(malformed(format!("frame of {} bytes too large", bytes.len())));
    }

    if bytes[0] != PROTOCOL_VERSION {
        return Err(malformed(format!("unsupported version {}", bytes[0])));
    }
    let tag = FrameTag::from_u8(bytes[1]).ok_or_else(|| malformed(format!("unknown tag {}", bytes[1])))?;
    let round = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    let declared = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;

    let payload = &bytes[FRAME_HEADER_LEN..];
    if declared != payload.len() {
        return Err(malformed(format!(
            "declared payload length {} but {} bytes present",
            declared,
            payload.len()
        )));
    }

    let body = match tag {
        FrameTag::Summary => FrameBody::Summary(from_cbor(payload, "summary")?),
        FrameTag::Delta => FrameBody::Delta(from_cbor(payload, "delta")?),
        FrameTag::Ack if payload.is_empty() => FrameBody::Ack(Ack { head: None }),
        FrameTag::Ack => FrameBody::Ack(Ack {
            head: Some(from_cbor(payload, "ack")?),
        }),
        FrameTag::Reject => FrameBody::Reject(from_cbor(payload, "reject")?),
    };

    let frame = Frame::new(round, body);
    frame.validate_limits().map_err(|e| malformed(e.to_string()))?;
    Ok(frame)
}

fn malformed(msg: String) -> SyncError {
    SyncError::MalformedFrame(msg)
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| SyncError::Encoding(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(payload: &[u8], what: &str) -> Result<T> {
    let mut cursor = std::io::Cursor::new(payload);
    let value = ciborium::from_reader(&mut cursor)
        .map_err(|e| malformed(format!("{} payload: {}", what, e)))?;

    if cursor.position() as usize != payload.len() {
        return Err(malformed(format!("trailing bytes after {} payload", what)));
    }
    Ok(value)
}
