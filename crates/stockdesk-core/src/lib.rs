#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for the stockdesk data and strategy core.
//!
//! This crate provides the foundational abstractions shared by every other
//! stockdesk crate:
//!
//! - [`Dataset`](dataset::Dataset) - Named, `(symbol, date)`-keyed table with an explicit schema
//! - [`CacheStore`](cache::CacheStore) - Durable dataset persistence
//! - [`DataSource`](provider::DataSource) - External data provider
//! - [`Rebalance`](frequency::Rebalance) - Strategy rebalance frequency
//! - [`DeskError`](error::DeskError) - Error taxonomy

/// Cache store trait and entry metadata.
pub mod cache;
/// Datasets and last-write-wins merging.
pub mod dataset;
/// Error types for data and strategy operations.
pub mod error;
/// Conversion to and from polars data frames.
pub mod frame;
/// Rebalance frequency definitions.
pub mod frequency;
/// Source trait for fetching data from the external provider.
pub mod provider;
/// Core value types (Symbol, Schema, Value, Record, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use cache::{CacheEntry, CacheStore, EntryMeta, ensure_storable};
pub use dataset::{Dataset, MergeStats};
pub use error::{DeskError, Result};
pub use frame::{DATE_COLUMN, SYMBOL_COLUMN};
pub use frequency::Rebalance;
pub use provider::DataSource;
pub use types::{
    ColumnSpec, ColumnType, CoverageRange, LoadOrigin, Loaded, Record, Schema, Symbol, Value,
};
