//! # Replog Sync
//!
//! Reconciliation protocol for two replicas of one append-only log.
//!
//! ## Overview
//!
//! Each side advertises a Summary of its log (head plus a digest over the
//! last few entry hashes). The side that is ahead pushes Delta frames with
//! the missing entries; the side that is behind appends them after checking
//! signatures and hash links. Once both heads match, each side sends an Ack
//! and the session converges. If the histories conflict, the detecting side
//! sends a Reject and neither log is modified past the common prefix.
//!
//! ## Key Properties
//!
//! - **Transport-agnostic**: frames are plain bytes; delivery is the caller's job
//! - **Round-checked**: each frame carries a round counter, replays are refused
//! - **Bounded**: Delta size and total rounds are capped by [`SyncConfig`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replog_core::PeerId;
//! use replog_store::MemoryStore;
//! use replog_sync::{codec, SyncConfig, SyncSession};
//!
//! async fn example() -> replog_sync::Result<()> {
//!     let local = MemoryStore::new();
//!     let (mut session, opening) =
//!         SyncSession::open(PeerId::random(), &local, SyncConfig::default()).await?;
//!     let wire = codec::encode(&opening)?;
//!     // ... deliver `wire`, then feed each reply back in:
//!     // let advance = session.handle(&local, &codec::decode(&reply)?).await?;
//!     # let _ = (&mut session, wire);
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Initiator (5 entries)                Responder (empty)
//!   |-------- Summary r0 (seq 5) ------->|
//!   |<------- Summary r1 (seq 0) --------|
//!   |-------- Delta r2 (1..=5) --------->|
//!   |<------- Ack r3 --------------------|
//!   |-------- Ack r4 ------------------->|   converged
//! ```

pub mod codec;
pub mod config;
pub mod digest;
pub mod error;
pub mod messages;
pub mod session;

pub use codec::{decode, decode_bounded, encode};
pub use config::SyncConfig;
pub use digest::{compare, compute_window_digest, Comparison, LogView};
pub use error::{Result, SyncError};
pub use messages::{
    limits, Ack, Delta, Frame, FrameBody, FrameTag, Reject, RejectCode, Summary, FRAME_HEADER_LEN,
    PROTOCOL_VERSION,
};
pub use session::{Advance, Role, SessionReport, SessionState, SyncSession, Verdict};
