//! Test fixtures and helpers.
//!
//! Common setup code for sync and integration tests.

use bytes::Bytes;

use replog_core::{EntryBuilder, Keypair, LogEntry, LogHead, WriterKey};
use replog_store::{LogStore, MemoryStore};

/// Timestamp of entry seq 0; entry `n` is stamped `BASE_TIMESTAMP + n`.
pub const BASE_TIMESTAMP: i64 = 1_700_000_000_000;

/// A deterministic writer.
///
/// Entries depend only on the seed, the tag and the position they are
/// appended at, never on wall-clock time.
#[derive(Clone)]
pub struct LogFixture {
    pub keypair: Keypair,
    tag: String,
}

impl LogFixture {
    /// Create a fixture whose keypair is derived from `[seed; 32]`.
    pub fn new(seed: u8) -> Self {
        Self {
            keypair: Keypair::from_seed(&[seed; 32]),
            tag: "entry".to_string(),
        }
    }

    /// Same writer, different payloads. Used to build forks.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn writer_key(&self) -> WriterKey {
        self.keypair.writer_key()
    }

    pub fn payload_for(&self, seq: u64) -> Bytes {
        Bytes::from(format!("{}-{}", self.tag, seq))
    }

    /// Build the entry that would follow `head`.
    pub fn entry_after(&self, head: &LogHead) -> LogEntry {
        let seq = head.seq + 1;
        EntryBuilder::after(head)
            .timestamp(BASE_TIMESTAMP + seq as i64)
            .payload(self.payload_for(seq))
            .sign(&self.keypair)
    }

    /// A fresh chain of `n` entries starting at seq 1.
    pub fn chain(&self, n: u64) -> Vec<LogEntry> {
        self.chain_from(LogHead::EMPTY, n)
    }

    /// `n` entries continuing from `head`.
    pub fn chain_from(&self, mut head: LogHead, n: u64) -> Vec<LogEntry> {
        let mut entries = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let entry = self.entry_after(&head);
            head = entry.as_head();
            entries.push(entry);
        }
        entries
    }

    /// Append `n` entries on top of whatever `store` currently holds.
    pub async fn extend<S: LogStore + ?Sized>(&self, store: &S, n: u64) -> LogHead {
        let head = store.head().await.expect("read fixture head");
        let entries = self.chain_from(head, n);
        if !entries.is_empty() {
            store
                .append_batch(&entries)
                .await
                .expect("append fixture entries");
        }
        store.head().await.expect("read fixture head")
    }
}

/// Two stores sharing `common` entries, then diverging with `left` and
/// `right` further entries respectively.
pub async fn forked_pair(common: u64, left: u64, right: u64) -> (MemoryStore, MemoryStore) {
    let base = LogFixture::new(1);
    let a = MemoryStore::named("left");
    let b = MemoryStore::named("right");

    base.extend(&a, common).await;
    base.extend(&b, common).await;
    base.clone().with_tag("left").extend(&a, left).await;
    base.with_tag("right").extend(&b, right).await;

    (a, b)
}
