//! # Replog Testkit
//!
//! Testing utilities for replog.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: deterministic writers that fill stores with valid chains
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! Two fixtures built from the same seed produce identical entries, so
//! extending two stores with one fixture yields replicas that share a prefix:
//!
//! ```rust,ignore
//! use replog_store::MemoryStore;
//! use replog_testkit::LogFixture;
//!
//! let fixture = LogFixture::new(1);
//! let a = MemoryStore::new();
//! let b = MemoryStore::new();
//! fixture.extend(&a, 10).await;
//! fixture.extend(&b, 4).await; // b is a prefix of a
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use replog_testkit::generators::{chain_from_params, ChainParams};
//!
//! proptest! {
//!     #[test]
//!     fn chain_is_linked(params: ChainParams) {
//!         let entries = chain_from_params(&params);
//!         prop_assert_eq!(entries.len() as u64, params.len);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{forked_pair, LogFixture, BASE_TIMESTAMP};
pub use generators::{chain_from_params, ChainParams};
