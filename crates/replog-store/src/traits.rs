//! LogStore trait: the abstract interface for log persistence.
//!
//! This trait keeps the sync engine storage-agnostic. Implementations
//! include SQLite (primary) and in-memory.

use async_trait::async_trait;
use bytes::Bytes;
use replog_core::{EntryBuilder, EntryHash, Keypair, LogEntry, LogHead, MAX_ENTRY_PAYLOAD};

use crate::error::Result;

/// Result of appending a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// Entry was appended at the head.
    Appended,
    /// The identical entry is already at this position (idempotent - not an error).
    AlreadyExists,
    /// A different entry already occupies this position.
    Conflict {
        /// The hash of the existing entry.
        existing: EntryHash,
    },
}

/// Outcome of an atomic batch append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Entries newly written.
    pub appended: usize,
    /// Entries that were already present with the same hash.
    pub skipped: usize,
}

/// The LogStore trait: async interface to one named, append-only log.
///
/// All methods are async to support both blocking (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Positions**: sequence numbers start at 1 and are contiguous.
/// - **Idempotent appends**: re-appending the same entry returns `AlreadyExists`.
/// - **Conflict detection**: appending a different entry at an occupied
///   position returns `Conflict` with the existing hash; the log is untouched.
/// - **No chain checks**: the store trusts the caller to have validated
///   signatures and `prev_hash` links.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// The name this log was opened under.
    fn name(&self) -> &str;

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Append one entry.
    ///
    /// # Returns
    /// - `Appended` if the entry extended the log by one.
    /// - `AlreadyExists` if the exact same entry is already at its position.
    /// - `Conflict` if a different entry is at its position.
    ///
    /// Fails with `NonContiguous` if `entry.seq()` is beyond `head + 1`.
    async fn append(&self, entry: &LogEntry) -> Result<AppendResult>;

    /// Append a contiguous, ascending batch atomically.
    ///
    /// Entries already present with the same hash are skipped. If any entry
    /// conflicts or the batch leaves a gap, nothing is written and the error
    /// (`Conflict` or `NonContiguous`) is returned.
    async fn append_batch(&self, entries: &[LogEntry]) -> Result<BatchResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the entry at a position.
    async fn get_entry(&self, seq: u64) -> Result<Option<LogEntry>>;

    /// Get entries with `start <= seq <= end`, ordered by seq.
    async fn get_entries_range(&self, start: u64, end: u64) -> Result<Vec<LogEntry>>;

    /// Get the hash of the entry at a position.
    async fn get_hash_at(&self, seq: u64) -> Result<Option<EntryHash>>;

    /// Get `(seq, hash)` pairs with `start <= seq <= end`, ordered by seq.
    async fn get_hashes_range(&self, start: u64, end: u64) -> Result<Vec<(u64, EntryHash)>>;

    /// Current head of the log.
    async fn head(&self) -> Result<LogHead>;
}

/// Decide which entries of a batch must be written.
///
/// `hash_at` looks up the stored hash at a position; `head_seq` is the
/// current head. Returns the indices of entries to write (always a suffix of
/// the batch) and the number skipped as already present.
pub(crate) fn plan_batch<F>(
    entries: &[LogEntry],
    head_seq: u64,
    mut hash_at: F,
) -> Result<(std::ops::Range<usize>, usize)>
where
    F: FnMut(u64) -> Result<Option<EntryHash>>,
{
    let Some(first) = entries.first() else {
        return Ok((0..0, 0));
    };

    if first.seq() == 0 || first.seq() > head_seq + 1 {
        return Err(crate::StoreError::NonContiguous {
            expected: head_seq + 1,
            got: first.seq(),
        });
    }

    let mut skipped = 0;
    for (i, entry) in entries.iter().enumerate() {
        let expected = first.seq() + i as u64;
        if entry.seq() != expected {
            return Err(crate::StoreError::NonContiguous {
                expected,
                got: entry.seq(),
            });
        }
        if entry.seq() > head_seq {
            continue;
        }

        let hash = entry.compute_hash();
        match hash_at(entry.seq())? {
            Some(existing) if existing == hash => skipped += 1,
            Some(existing) => {
                return Err(crate::StoreError::Conflict {
                    seq: entry.seq(),
                    existing: existing.to_hex(),
                })
            }
            None => {
                return Err(crate::StoreError::InvalidData(format!(
                    "missing entry at seq {} below head {}",
                    entry.seq(),
                    head_seq
                )))
            }
        }
    }

    Ok((skipped..entries.len(), skipped))
}

/// Extension trait for local writers.
pub trait LogStoreExt: LogStore {
    /// Sign `payload` as the next entry and append it.
    ///
    /// Payloads over [`MAX_ENTRY_PAYLOAD`] are refused. Returns the new head.
    fn append_local(
        &self,
        keypair: &Keypair,
        payload: Bytes,
        timestamp: i64,
    ) -> impl std::future::Future<Output = Result<LogHead>> + Send;
}

impl<S: LogStore + ?Sized> LogStoreExt for S {
    async fn append_local(
        &self,
        keypair: &Keypair,
        payload: Bytes,
        timestamp: i64,
    ) -> Result<LogHead> {
        if payload.len() > MAX_ENTRY_PAYLOAD {
            return Err(crate::StoreError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_ENTRY_PAYLOAD,
            });
        }

        let head = self.head().await?;
        let entry = EntryBuilder::after(&head)
            .timestamp(timestamp)
            .payload(payload)
            .sign(keypair);

        match self.append(&entry).await? {
            AppendResult::Appended | AppendResult::AlreadyExists => Ok(entry.as_head()),
            AppendResult::Conflict { existing } => Err(crate::StoreError::Conflict {
                seq: entry.seq(),
                existing: existing.to_hex(),
            }),
        }
    }
}
