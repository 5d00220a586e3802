#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Strategy evaluation for stockdesk.
//!
//! - [`Strategy`] - Pure mapping from a [`Snapshot`] and [`Params`] to picks
//! - [`StrategyRegistry`] - Named strategies with validated parameter declarations
//! - [`StrategyEngine`] - `evaluate`, `optimize` and `select` against a cache store
//! - [`run_backtest`] - The pure backtest loop the engine drives

/// Pure backtest loop, trading costs and results.
pub mod backtest;
/// Built-in value, growth, momentum and composite strategies.
pub mod builtin;
/// Strategy engine reading from a cache store.
pub mod engine;
/// Performance metrics.
pub mod metrics;
/// Parameter declarations, values and grids.
pub mod params;
/// Ranked selections.
pub mod selection;
/// Point-in-time dataset views.
pub mod snapshot;
/// Strategy trait and registry.
pub mod strategy;

pub use backtest::{
    BacktestResult, BacktestSettings, DateRange, Objective, Period, TradingCosts, run_backtest,
};
pub use builtin::{CompositeStrategy, GrowthStrategy, MomentumStrategy, ValueStrategy};
pub use engine::{EngineConfig, StrategyEngine, WalkForward, WalkForwardWindow};
pub use metrics::Metrics;
pub use params::{ParamGrid, ParamKind, ParamSpec, ParamValue, Params};
pub use selection::{Pick, Selection};
pub use snapshot::Snapshot;
pub use strategy::{Strategy, StrategyRegistry};
