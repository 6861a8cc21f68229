//! # Replog
//!
//! Peer-to-peer reconciliation of replicated append-only logs.
//!
//! ## Overview
//!
//! A host binds a handle to a named log, opens a sync session with a peer,
//! and shuttles the resulting frames over whatever transport it owns. Each
//! inbound frame advances the session until both replicas hold the same
//! entries, or until a fork is found.
//!
//! - **Registry**: handles, per-peer sessions, serialized access per handle
//! - **Bridge**: owned wire messages, poll and push delivery
//! - **FFI**: the same operations behind a C ABI with integer status codes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replog::{Bridge, RegistryConfig};
//! use replog::core::PeerId;
//!
//! async fn example() -> replog::Result<()> {
//!     let bridge = Bridge::new(RegistryConfig::in_memory());
//!     let log1 = bridge.create_handle("log1", None).await?;
//!     let log2 = bridge.create_handle("log2", None).await?;
//!     let peer = PeerId::random();
//!
//!     let mut msg = bridge.init_sync(log1, peer).await?;
//!     let mut target = log2;
//!     loop {
//!         let reply = bridge.handle_msg(target, peer, msg).await?;
//!         match reply.msg {
//!             Some(next) => msg = next,
//!             None => break,
//!         }
//!         target = if target == log1 { log2 } else { log1 };
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `replog::core` - entries, hashes, keys
//! - `replog::store` - storage trait, SQLite and in-memory stores
//! - `replog::sync` - frames, codec, session state machine

pub mod bridge;
pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod registry;

// Re-export component crates
pub use replog_core as core;
pub use replog_store as store;
pub use replog_sync as sync;

pub use bridge::{Bridge, Delivery, Reply, WireMsg};
pub use config::{RegistryConfig, StorageBackend};
pub use error::{ReplogError, Result, StatusCode};
pub use registry::{LogHandle, SyncRegistry};

pub use replog_core::{Keypair, LogHead, PeerId};
pub use replog_sync::{Advance, SessionState, SyncConfig, Verdict};
