//! # Replog Store
//!
//! Storage abstraction for replicated logs. Provides a trait-based interface
//! for append-only entry persistence with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The sync engine never owns a storage format. It reads and appends through
//! the [`LogStore`] trait. The primary implementation is [`SqliteStore`], one
//! database file per named log; [`MemoryStore`] serves tests and ephemeral
//! replicas.
//!
//! ## Key Types
//!
//! - [`LogStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage
//! - [`AppendResult`] - Result of appending one entry
//! - [`BatchResult`] - Result of appending a verified batch
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replog_store::{LogStore, SqliteStore};
//!
//! async fn example() {
//!     // Open (or create) the log stored in `orders.db`
//!     let store = SqliteStore::open("orders.db").unwrap();
//!     let head = store.head().await.unwrap();
//!     println!("{} entries, head {}", head.seq, head);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Append-only**: entries occupy positions 1, 2, 3, ... with no gaps, and
//!   a position's hash never changes once written
//! - **Idempotent appends**: appending the entry already at a position returns `AlreadyExists`
//! - **Conflict detection**: a different entry at an occupied position returns `Conflict`
//! - **Atomic batches**: [`LogStore::append_batch`] applies all of a batch or none of it

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AppendResult, BatchResult, LogStore, LogStoreExt};

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
