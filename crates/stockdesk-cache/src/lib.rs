#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Cache store implementations for stockdesk datasets.
//!
//! This crate provides implementations of the [`CacheStore`] trait from `stockdesk-core`:
//!
//! - [`FileStore`] - Atomic file-per-dataset store (default)
//! - [`InMemoryStore`] - Simple in-memory store for testing
//! - [`SqliteStore`] - Single-file SQLite store (requires `sqlite` feature)

/// File-per-dataset store implementation.
pub mod file;
/// In-memory store implementation.
pub mod memory;

/// SQLite-based store implementation.
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the trait for convenience
pub use stockdesk_core::CacheStore;

// Re-export implementations
pub use file::FileStore;
pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
