//! LogEntry: one appended, signed record of a replicated log.
//!
//! Entries are immutable. Once an entry holds a sequence position its hash
//! never changes, and every later entry commits to it through `prev_hash`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_bytes, signed_message_from_parts};
use crate::crypto::{Blake3Hash, EntrySignature, Keypair, WriterKey};
use crate::types::{EntryHash, LogHead};

/// The current entry schema version.
pub const ENTRY_VERSION: u8 = 0;

/// Largest payload a single entry may carry.
pub const MAX_ENTRY_PAYLOAD: usize = 1024 * 1024;

/// Metadata for an entry. This is what gets canonicalized and signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Schema version (currently 0).
    pub version: u8,

    /// Position in the log (1-indexed).
    pub seq: u64,

    /// Writer-claimed timestamp (Unix milliseconds). Untrusted.
    pub timestamp: i64,

    /// Public key of the writer.
    pub writer: WriterKey,

    /// Hash of the entry at `seq - 1` (None iff seq == 1).
    pub prev_hash: Option<EntryHash>,

    /// Blake3 hash of the payload bytes.
    pub payload_hash: Blake3Hash,
}

/// A complete entry: header + payload + signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub header: EntryHeader,

    /// Opaque application value.
    pub payload: Bytes,

    /// Ed25519 signature over (canonical_header || payload).
    pub signature: EntrySignature,
}

impl LogEntry {
    /// Compute the entry hash (Blake3 of canonical bytes).
    pub fn compute_hash(&self) -> EntryHash {
        EntryHash(Blake3Hash::hash(&canonical_bytes(self)).0)
    }

    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    pub fn prev_hash(&self) -> Option<&EntryHash> {
        self.header.prev_hash.as_ref()
    }

    pub fn writer(&self) -> &WriterKey {
        &self.header.writer
    }

    /// The head a log would have with this entry on top.
    pub fn as_head(&self) -> LogHead {
        LogHead::at(self.header.seq, self.compute_hash())
    }
}

/// Builder for creating entries.
pub struct EntryBuilder {
    seq: u64,
    timestamp: i64,
    prev_hash: Option<EntryHash>,
    payload: Bytes,
}

impl EntryBuilder {
    /// Start building the entry at `seq`.
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            timestamp: 0,
            prev_hash: None,
            payload: Bytes::new(),
        }
    }

    /// Start building the entry that follows `head`.
    pub fn after(head: &LogHead) -> Self {
        Self {
            seq: head.seq + 1,
            timestamp: 0,
            prev_hash: head.hash,
            payload: Bytes::new(),
        }
    }

    pub fn timestamp(mut self, ts: i64) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn prev(mut self, prev: EntryHash) -> Self {
        self.prev_hash = Some(prev);
        self
    }

    pub fn payload(mut self, p: impl Into<Bytes>) -> Self {
        self.payload = p.into();
        self
    }

    /// Build and sign the entry.
    pub fn sign(self, keypair: &Keypair) -> LogEntry {
        let header = EntryHeader {
            version: ENTRY_VERSION,
            seq: self.seq,
            timestamp: self.timestamp,
            writer: keypair.writer_key(),
            prev_hash: self.prev_hash,
            payload_hash: Blake3Hash::hash(&self.payload),
        };

        let signature = keypair.sign(&signed_message_from_parts(&header, &self.payload));

        LogEntry {
            header,
            payload: self.payload,
            signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder() {
        let keypair = Keypair::generate();
        let entry = EntryBuilder::new(1)
            .timestamp(1234567890000)
            .payload(b"hello".to_vec())
            .sign(&keypair);

        assert_eq!(entry.seq(), 1);
        assert_eq!(entry.prev_hash(), None);
        assert_eq!(entry.payload.as_ref(), b"hello");
        assert_eq!(entry.writer(), &keypair.writer_key());
    }

    #[test]
    fn test_entry_hash_deterministic() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let entry = EntryBuilder::new(1)
            .timestamp(1234567890000)
            .payload(b"hello".to_vec())
            .sign(&keypair);

        assert_eq!(entry.compute_hash(), entry.compute_hash());
    }

    #[test]
    fn test_after_links_to_head() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let first = EntryBuilder::after(&LogHead::EMPTY).sign(&keypair);
        assert_eq!(first.seq(), 1);
        assert!(first.prev_hash().is_none());

        let second = EntryBuilder::after(&first.as_head()).sign(&keypair);
        assert_eq!(second.seq(), 2);
        assert_eq!(second.prev_hash(), Some(&first.compute_hash()));
    }

    #[test]
    fn test_payload_changes_hash() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let a = EntryBuilder::new(1).payload(b"a".to_vec()).sign(&keypair);
        let b = EntryBuilder::new(1).payload(b"b".to_vec()).sign(&keypair);
        assert_ne!(a.compute_hash(), b.compute_hash());
    }
}
