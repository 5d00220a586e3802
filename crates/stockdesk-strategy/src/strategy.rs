//! Strategy trait and registry.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use stockdesk_core::{DeskError, Result};
use tracing::debug;

use crate::{
    params::{ParamSpec, Params},
    selection::Pick,
    snapshot::Snapshot,
};

/// A named, pure mapping from a point-in-time snapshot and parameters to picks.
///
/// Implementations must be deterministic: the same snapshot and parameters
/// always produce the same picks. Randomness is only allowed behind an
/// explicit seed parameter.
pub trait Strategy: Send + Sync + Debug {
    /// Registry name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Datasets the strategy reads through its snapshot.
    fn datasets(&self) -> Vec<String>;

    /// Declared parameters.
    fn params(&self) -> Vec<ParamSpec>;

    /// Scores the securities selected on `snapshot.date()`.
    ///
    /// The engine ranks the picks and applies `top_n`.
    fn select(&self, snapshot: &Snapshot<'_>, params: &Params) -> Result<Vec<Pick>>;
}

/// Registered strategies by name.
///
/// Strategies are immutable once registered; their parameter declarations
/// are checked at registration.
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `value`, `growth` and `momentum` strategies.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for strategy in crate::builtin::all() {
            // Built-in declarations are covered by tests.
            if let Err(e) = registry.register(strategy) {
                tracing::error!(error = %e, "Built-in strategy rejected");
            }
        }
        registry
    }

    /// Registers a strategy.
    ///
    /// Fails with [`DeskError::InvalidParameter`] for a duplicate strategy name,
    /// duplicate parameter names or an inconsistent parameter declaration.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Result<()> {
        let name = strategy.name().to_string();
        if name.is_empty() {
            return Err(DeskError::InvalidParameter("strategy with empty name".into()));
        }
        if self.strategies.contains_key(&name) {
            return Err(DeskError::InvalidParameter(format!(
                "strategy {name} is already registered"
            )));
        }
        let specs = strategy.params();
        for (i, spec) in specs.iter().enumerate() {
            spec.check()?;
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(DeskError::InvalidParameter(format!(
                    "strategy {name} declares {} twice",
                    spec.name
                )));
            }
        }

        debug!(strategy = %name, params = specs.len(), "Registering strategy");
        self.strategies.insert(name, strategy);
        Ok(())
    }

    /// Looks up a strategy by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| DeskError::UnknownStrategy(name.to_string()))
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
