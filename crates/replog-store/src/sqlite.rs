//! SQLite implementation of the LogStore trait.
//!
//! The primary storage backend: one database file per named log. Uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use replog_core::{
    Blake3Hash, EntryHash, EntryHeader, EntrySignature, LogEntry, LogHead, WriterKey,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::now_millis;
use crate::traits::{plan_batch, AppendResult, BatchResult, LogStore};

const ENTRY_COLUMNS: &str =
    "seq, hash, version, timestamp, writer, prev_hash, payload_hash, payload, signature";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// Name recorded in the database when it was created.
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open the log stored at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist. A new
    /// database records the file name as the log name.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let default_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let conn = Connection::open(path)?;
        Self::init(conn, &default_name)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(mut conn: Connection, default_name: &str) -> Result<Self> {
        migration::migrate(&mut conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO log_meta (key, value) VALUES ('name', ?1)",
            params![default_name],
        )?;
        let name: String = conn.query_row(
            "SELECT value FROM log_meta WHERE key = 'name'",
            [],
            |row| row.get(0),
        )?;

        Ok(Self {
            name,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn fixed<const N: usize>(bytes: Vec<u8>, idx: usize, column: &str) -> rusqlite::Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, column.into(), Type::Blob))
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogEntry> {
    let prev: Option<Vec<u8>> = row.get(5)?;
    let payload: Vec<u8> = row.get(7)?;

    let header = EntryHeader {
        seq: row.get(0)?,
        version: row.get(2)?,
        timestamp: row.get(3)?,
        writer: WriterKey(fixed(row.get(4)?, 4, "writer")?),
        prev_hash: prev
            .map(|b| fixed(b, 5, "prev_hash").map(EntryHash))
            .transpose()?,
        payload_hash: Blake3Hash(fixed(row.get(6)?, 6, "payload_hash")?),
    };

    Ok(LogEntry {
        header,
        payload: Bytes::from(payload),
        signature: EntrySignature(fixed(row.get(8)?, 8, "signature")?),
    })
}

fn head_in(conn: &Connection) -> Result<LogHead> {
    let row: Option<(u64, Vec<u8>)> = conn
        .query_row(
            "SELECT seq, hash FROM log_entries ORDER BY seq DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((seq, hash)) => Ok(LogHead::at(seq, EntryHash(fixed(hash, 1, "hash")?))),
        None => Ok(LogHead::EMPTY),
    }
}

fn hash_at_in(conn: &Connection, seq: u64) -> Result<Option<EntryHash>> {
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            "SELECT hash FROM log_entries WHERE seq = ?1",
            params![seq],
            |row| row.get(0),
        )
        .optional()?;

    Ok(bytes
        .map(|b| fixed(b, 0, "hash").map(EntryHash))
        .transpose()?)
}

fn insert_in(conn: &Connection, entry: &LogEntry, now: i64) -> Result<()> {
    let h = &entry.header;
    let hash = entry.compute_hash();

    conn.execute(
        "INSERT INTO log_entries (
            seq, hash, version, timestamp, writer, prev_hash,
            payload_hash, payload, signature, appended_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            h.seq,
            hash.0.as_slice(),
            h.version,
            h.timestamp,
            h.writer.0.as_slice(),
            h.prev_hash.map(|p| p.0.to_vec()),
            h.payload_hash.0.as_slice(),
            &entry.payload[..],
            entry.signature.0.as_slice(),
            now,
        ],
    )?;

    Ok(())
}

#[async_trait]
impl LogStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&self, entry: &LogEntry) -> Result<AppendResult> {
        let entry = entry.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let head = head_in(&tx)?;
            let seq = entry.seq();

            if seq == 0 || seq > head.seq + 1 {
                return Err(StoreError::NonContiguous {
                    expected: head.seq + 1,
                    got: seq,
                });
            }

            if let Some(existing) = hash_at_in(&tx, seq)? {
                return Ok(if existing == entry.compute_hash() {
                    AppendResult::AlreadyExists
                } else {
                    AppendResult::Conflict { existing }
                });
            }

            insert_in(&tx, &entry, now_millis())?;
            tx.commit()?;
            Ok(AppendResult::Appended)
        })
        .await
    }

    async fn append_batch(&self, entries: &[LogEntry]) -> Result<BatchResult> {
        let entries = entries.to_vec();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let head = head_in(&tx)?;
            let (to_write, skipped) = plan_batch(&entries, head.seq, |seq| hash_at_in(&tx, seq))?;

            let now = now_millis();
            let appended = to_write.len();
            for entry in &entries[to_write] {
                insert_in(&tx, entry, now)?;
            }

            tx.commit()?;
            Ok(BatchResult { appended, skipped })
        })
        .await
    }

    async fn get_entry(&self, seq: u64) -> Result<Option<LogEntry>> {
        self.blocking(move |conn| {
            let sql = format!("SELECT {} FROM log_entries WHERE seq = ?1", ENTRY_COLUMNS);
            Ok(conn.query_row(&sql, params![seq], row_to_entry).optional()?)
        })
        .await
    }

    async fn get_entries_range(&self, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM log_entries WHERE seq >= ?1 AND seq <= ?2 ORDER BY seq",
                ENTRY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map(params![start, end], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn get_hash_at(&self, seq: u64) -> Result<Option<EntryHash>> {
        self.blocking(move |conn| hash_at_in(conn, seq)).await
    }

    async fn get_hashes_range(&self, start: u64, end: u64) -> Result<Vec<(u64, EntryHash)>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, hash FROM log_entries
                 WHERE seq >= ?1 AND seq <= ?2
                 ORDER BY seq",
            )?;
            let pairs = stmt
                .query_map(params![start, end], |row| {
                    let seq: u64 = row.get(0)?;
                    Ok((seq, EntryHash(fixed(row.get(1)?, 1, "hash")?)))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(pairs)
        })
        .await
    }

    async fn head(&self) -> Result<LogHead> {
        self.blocking(|conn| head_in(conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replog_core::{EntryBuilder, Keypair};

    fn chain(keypair: &Keypair, n: u64) -> Vec<LogEntry> {
        let mut head = LogHead::EMPTY;
        (0..n)
            .map(|i| {
                let entry = EntryBuilder::after(&head)
                    .timestamp(1234567890000 + i as i64)
                    .payload(format!("test payload {}", i + 1).into_bytes())
                    .sign(keypair);
                head = entry.as_head();
                entry
            })
            .collect()
    }

    #[tokio::test]
    async fn test_append_and_get_entry() {
        let store = SqliteStore::open_memory().unwrap();
        let entries = chain(&Keypair::generate(), 2);

        assert_eq!(store.append(&entries[0]).await.unwrap(), AppendResult::Appended);
        assert_eq!(store.append(&entries[1]).await.unwrap(), AppendResult::Appended);

        let retrieved = store.get_entry(2).await.unwrap().unwrap();
        assert_eq!(retrieved, entries[1]);
        assert_eq!(retrieved.compute_hash(), entries[1].compute_hash());
        assert_eq!(store.head().await.unwrap(), entries[1].as_head());
    }

    #[tokio::test]
    async fn test_idempotent_append() {
        let store = SqliteStore::open_memory().unwrap();
        let entries = chain(&Keypair::generate(), 1);

        store.append(&entries[0]).await.unwrap();
        assert_eq!(
            store.append(&entries[0]).await.unwrap(),
            AppendResult::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_conflict_detection() {
        let store = SqliteStore::open_memory().unwrap();
        let ours = chain(&Keypair::from_seed(&[1; 32]), 1);
        let theirs = chain(&Keypair::from_seed(&[2; 32]), 1);

        store.append(&ours[0]).await.unwrap();
        let result = store.append(&theirs[0]).await.unwrap();
        assert!(matches!(result, AppendResult::Conflict { existing } if existing == ours[0].compute_hash()));
    }

    #[tokio::test]
    async fn test_batch_rollback_on_conflict() {
        let store = SqliteStore::open_memory().unwrap();
        let ours = chain(&Keypair::from_seed(&[1; 32]), 3);
        let theirs = chain(&Keypair::from_seed(&[2; 32]), 5);

        store.append_batch(&ours).await.unwrap();
        let err = store.append_batch(&theirs).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { seq: 1, .. }));

        assert_eq!(store.head().await.unwrap(), ours[2].as_head());
        assert_eq!(store.get_entries_range(1, 10).await.unwrap(), ours);
    }

    #[tokio::test]
    async fn test_batch_gap_rejected() {
        let store = SqliteStore::open_memory().unwrap();
        let entries = chain(&Keypair::generate(), 4);

        let err = store.append_batch(&entries[2..]).await.unwrap_err();
        assert!(matches!(err, StoreError::NonContiguous { expected: 1, got: 3 }));
        assert!(store.head().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log1.db");
        let entries = chain(&Keypair::generate(), 3);

        {
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.name(), "log1.db");
            store.append_batch(&entries).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.head().await.unwrap(), entries[2].as_head());
        let hashes = store.get_hashes_range(2, 3).await.unwrap();
        assert_eq!(
            hashes,
            vec![(2, entries[1].compute_hash()), (3, entries[2].compute_hash())]
        );
    }
}
