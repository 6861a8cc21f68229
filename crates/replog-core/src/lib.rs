//! # Replog Core
//!
//! Pure primitives for replicated append-only logs: entries, hashes,
//! peer identifiers, and canonicalization.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`LogEntry`] - One appended record: header, payload, writer signature
//! - [`EntryHash`] - Content-addressed identifier of an entry (Blake3)
//! - [`LogHead`] - Latest sequence position of a log and the hash there
//! - [`PeerId`] - Fixed 32-byte identifier of a remote replica
//!
//! ## Canonicalization
//!
//! Entry headers are encoded using deterministic CBOR. See [`canonical`] module.
//! Every entry commits to its predecessor through `prev_hash`, so the hash at
//! a log's head commits to the whole history below it.

pub mod canonical;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod types;
pub mod validation;

pub use canonical::{canonical_bytes, canonical_header_bytes, signed_message};
pub use crypto::{Blake3Hash, EntrySignature, Keypair, WriterKey};
pub use entry::{EntryBuilder, EntryHeader, LogEntry, ENTRY_VERSION, MAX_ENTRY_PAYLOAD};
pub use error::{CoreError, ValidationError};
pub use types::{EntryHash, LogHead, PeerId};
pub use validation::{validate_chain_link, validate_entry, validate_entry_structure};
