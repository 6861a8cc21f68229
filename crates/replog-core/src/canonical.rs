//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding for entry
//! headers:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! Two replicas holding the same entry must compute the same [`EntryHash`],
//! so the bytes fed to the hasher never depend on serde field order.
//!
//! [`EntryHash`]: crate::types::EntryHash

use ciborium::value::{Integer, Value};

use crate::entry::{EntryHeader, LogEntry};

/// Header field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const VERSION: u64 = 0;
    pub const SEQ: u64 = 1;
    pub const TIMESTAMP: u64 = 2;
    pub const WRITER: u64 = 3;
    pub const PREV_HASH: u64 = 4;
    pub const PAYLOAD_HASH: u64 = 5;
}

/// Encode an entry header to canonical CBOR bytes.
pub fn canonical_header_bytes(header: &EntryHeader) -> Vec<u8> {
    let value = header_to_cbor_value(header);
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &value);
    buf
}

/// Encode an entire entry to canonical bytes.
///
/// Format: canonical_header || payload || signature
pub fn canonical_bytes(entry: &LogEntry) -> Vec<u8> {
    let mut buf = signed_message_from_parts(&entry.header, &entry.payload);
    buf.extend_from_slice(&entry.signature.0);
    buf
}

/// The bytes a writer signs (header || payload).
pub fn signed_message(entry: &LogEntry) -> Vec<u8> {
    signed_message_from_parts(&entry.header, &entry.payload)
}

pub(crate) fn signed_message_from_parts(header: &EntryHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = canonical_header_bytes(header);
    buf.extend_from_slice(payload);
    buf
}

fn key(k: u64) -> Value {
    Value::Integer(k.into())
}

fn header_to_cbor_value(header: &EntryHeader) -> Value {
    let prev = match &header.prev_hash {
        Some(hash) => Value::Bytes(hash.0.to_vec()),
        None => Value::Null,
    };

    Value::Map(vec![
        (key(keys::VERSION), Value::Integer(header.version.into())),
        (key(keys::SEQ), Value::Integer(header.seq.into())),
        (key(keys::TIMESTAMP), Value::Integer(header.timestamp.into())),
        (key(keys::WRITER), Value::Bytes(header.writer.0.to_vec())),
        (key(keys::PREV_HASH), prev),
        (
            key(keys::PAYLOAD_HASH),
            Value::Bytes(header.payload_hash.0.to_vec()),
        ),
    ])
}

/// Encode a header value: integers, byte strings, null, and the map itself.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        _ => buf.push(0xf6),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map with keys sorted by their encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}
