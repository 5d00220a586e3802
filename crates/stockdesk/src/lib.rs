#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/stockdesk/stockdesk/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Data and strategy core of the stockdesk dashboard.
//!
//! This crate re-exports the core types, cache stores, the HTTP source and
//! the strategy engine, and adds the write path over them: a [`Catalog`] of
//! declared datasets, the cache-first [`DataLoader`] and the [`CacheWarmer`]
//! that refreshes everything once per trading day.
//!
//! # Features
//!
//! - `sqlite` - SQLite-backed [`SqliteStore`]
//!
//! # Example
//!
//! ```rust,ignore
//! use stockdesk::{Desk, DateRange, Params, StockdeskConfig};
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() -> stockdesk::Result<()> {
//!     let config = StockdeskConfig::from_file("stockdesk.json")?;
//!     let desk = Desk::from_config(&config)?;
//!
//!     let prices = desk.loader().load_default("prices").await?;
//!     println!("{} rows, stale: {}", prices.value.len(), prices.stale);
//!
//!     let range = DateRange::new(
//!         NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
//!     )?;
//!     let result = desk.engine().evaluate("momentum", &Params::new(), range).await?;
//!     println!("{:?}", result.metrics);
//!
//!     Ok(())
//! }
//! ```

// Core types and traits
pub use stockdesk_core::*;

// Cache stores
#[cfg(feature = "sqlite")]
pub use stockdesk_cache::SqliteStore;
pub use stockdesk_cache::{FileStore, InMemoryStore};

// Provider
pub use stockdesk_rest::RestSource;

// Strategies
pub use stockdesk_strategy::{
    BacktestResult, BacktestSettings, CompositeStrategy, DateRange, EngineConfig, GrowthStrategy,
    Metrics, MomentumStrategy, Objective, ParamGrid, ParamKind, ParamSpec, ParamValue, Params,
    Period, Pick, Selection, Snapshot, Strategy, StrategyEngine, StrategyRegistry, TradingCosts,
    ValueStrategy, WalkForward, WalkForwardWindow, run_backtest,
};

/// Declared datasets and their load order.
pub mod catalog;
/// Configuration file.
pub mod config;
/// Combined loader, warmer and engine.
pub mod desk;
/// Cache-first dataset loader.
pub mod loader;
/// Daily cache refresh.
pub mod warmer;

pub use catalog::{Catalog, DatasetSpec};
pub use config::{SourceConfig, StockdeskConfig};
pub use desk::Desk;
pub use loader::{DataLoader, LoadPolicy};
pub use warmer::{CacheWarmer, DatasetReport, Outcome, Report};
