//! In-memory implementation of the LogStore trait.
//!
//! Same semantics as SQLite but keeps everything in memory with no
//! persistence.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use replog_core::{EntryHash, LogEntry, LogHead};

use crate::error::{Result, StoreError};
use crate::traits::{plan_batch, AppendResult, BatchResult, LogStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    name: String,
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Entry at seq `n` lives at index `n - 1`.
    entries: Vec<StoredEntry>,
}

struct StoredEntry {
    entry: LogEntry,
    hash: EntryHash,
}

impl MemoryStoreInner {
    fn hash_at(&self, seq: u64) -> Option<EntryHash> {
        let idx = seq.checked_sub(1)? as usize;
        self.entries.get(idx).map(|s| s.hash)
    }

    fn head(&self) -> LogHead {
        match self.entries.last() {
            Some(last) => LogHead::at(last.entry.seq(), last.hash),
            None => LogHead::EMPTY,
        }
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a new empty in-memory store under a log name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, entry: &LogEntry) -> Result<AppendResult> {
        let mut inner = self.write()?;
        let head = inner.head();
        let seq = entry.seq();

        if seq == 0 || seq > head.seq + 1 {
            return Err(StoreError::NonContiguous {
                expected: head.seq + 1,
                got: seq,
            });
        }

        let hash = entry.compute_hash();
        if let Some(existing) = inner.hash_at(seq) {
            return Ok(if existing == hash {
                AppendResult::AlreadyExists
            } else {
                AppendResult::Conflict { existing }
            });
        }

        inner.entries.push(StoredEntry {
            entry: entry.clone(),
            hash,
        });
        Ok(AppendResult::Appended)
    }

    async fn append_batch(&self, entries: &[LogEntry]) -> Result<BatchResult> {
        let mut inner = self.write()?;
        let head = inner.head();

        let (to_write, skipped) = plan_batch(entries, head.seq, |seq| Ok(inner.hash_at(seq)))?;
        let appended = to_write.len();

        for entry in &entries[to_write] {
            inner.entries.push(StoredEntry {
                entry: entry.clone(),
                hash: entry.compute_hash(),
            });
        }

        Ok(BatchResult { appended, skipped })
    }

    async fn get_entry(&self, seq: u64) -> Result<Option<LogEntry>> {
        let inner = self.read()?;
        let Some(idx) = seq.checked_sub(1) else {
            return Ok(None);
        };
        Ok(inner.entries.get(idx as usize).map(|s| s.entry.clone()))
    }

    async fn get_entries_range(&self, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        let inner = self.read()?;
        Ok(inner
            .entries
            .iter()
            .filter(|s| s.entry.seq() >= start && s.entry.seq() <= end)
            .map(|s| s.entry.clone())
            .collect())
    }

    async fn get_hash_at(&self, seq: u64) -> Result<Option<EntryHash>> {
        Ok(self.read()?.hash_at(seq))
    }

    async fn get_hashes_range(&self, start: u64, end: u64) -> Result<Vec<(u64, EntryHash)>> {
        let inner = self.read()?;
        Ok(inner
            .entries
            .iter()
            .filter(|s| s.entry.seq() >= start && s.entry.seq() <= end)
            .map(|s| (s.entry.seq(), s.hash))
            .collect())
    }

    async fn head(&self) -> Result<LogHead> {
        Ok(self.read()?.head())
    }
}
