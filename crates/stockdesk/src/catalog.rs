//! Declared datasets: schema, dependencies, freshness and history start.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use stockdesk_core::{ColumnSpec, DeskError, Result, Schema};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Declaration of one cached dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// Dataset name, also the provider's dataset identifier.
    pub name: String,
    /// Value columns, in order.
    pub columns: Vec<ColumnSpec>,
    /// Datasets that must be loaded before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Age after which a cached copy is stale.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// First date requested when nothing is cached yet.
    pub history_start: NaiveDate,
}

const fn default_max_age_secs() -> u64 {
    DAY_SECS
}

impl DatasetSpec {
    /// Creates a spec refreshed daily with no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Schema, history_start: NaiveDate) -> Self {
        Self {
            name: name.into(),
            columns: schema.columns().to_vec(),
            depends_on: Vec::new(),
            max_age_secs: DAY_SECS,
            history_start,
        }
    }

    /// Sets the upstream datasets.
    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the maximum age.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_secs = max_age.as_secs();
        self
    }

    /// Declared schema.
    #[must_use]
    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.clone())
    }

    /// Maximum age as a duration.
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Validated set of dataset declarations.
///
/// Names are unique, dependencies are declared and acyclic, and every schema
/// passes [`Schema::check`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    specs: BTreeMap<String, DatasetSpec>,
}

impl Catalog {
    /// Validates `specs` into a catalog.
    pub fn new(specs: impl IntoIterator<Item = DatasetSpec>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for spec in specs {
            if spec.name.is_empty() {
                return Err(DeskError::Config("dataset with empty name".into()));
            }
            spec.schema()
                .check()
                .map_err(|e| DeskError::Config(format!("{}: {e}", spec.name)))?;
            if let Some(previous) = map.insert(spec.name.clone(), spec) {
                return Err(DeskError::Config(format!(
                    "dataset {} declared twice",
                    previous.name
                )));
            }
        }

        for spec in map.values() {
            for upstream in &spec.depends_on {
                if !map.contains_key(upstream) {
                    return Err(DeskError::Config(format!(
                        "{} depends on undeclared dataset {upstream}",
                        spec.name
                    )));
                }
            }
        }

        let catalog = Self { specs: map };
        let names: Vec<String> = catalog.specs.keys().cloned().collect();
        if catalog.load_order(&names).len() != names.len() {
            return Err(DeskError::Config("dataset dependencies form a cycle".into()));
        }
        Ok(catalog)
    }

    /// Spec of `name`.
    pub fn get(&self, name: &str) -> Result<&DatasetSpec> {
        self.specs
            .get(name)
            .ok_or_else(|| DeskError::NotFound(name.to_string()))
    }

    /// True if `name` is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Declared names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Declared specs in name order.
    pub fn specs(&self) -> impl Iterator<Item = &DatasetSpec> {
        self.specs.values()
    }

    /// Number of declared datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// True if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Upstream datasets of `name` that are also in `within`.
    pub(crate) fn upstream_in<'a>(&'a self, name: &str, within: &'a BTreeSet<String>) -> impl Iterator<Item = &'a str> {
        self.specs
            .get(name)
            .into_iter()
            .flat_map(|s| s.depends_on.iter())
            .filter(move |d| within.contains(*d))
            .map(String::as_str)
    }

    /// Orders declared `names` so dependencies come first, ties by name.
    ///
    /// Only dependencies among `names` constrain the order. Undeclared names
    /// and members of a cycle are left out.
    #[must_use]
    pub fn load_order(&self, names: &[String]) -> Vec<String> {
        let wanted: BTreeSet<String> = names.iter().filter(|n| self.contains(n)).cloned().collect();
        let mut pending: BTreeMap<&str, usize> = wanted
            .iter()
            .map(|n| (n.as_str(), self.upstream_in(n, &wanted).count()))
            .collect();

        let mut order = Vec::with_capacity(wanted.len());
        loop {
            let Some(next) = pending
                .iter()
                .find(|(_, remaining)| **remaining == 0)
                .map(|(n, _)| *n)
            else {
                break;
            };
            pending.remove(next);
            for (name, remaining) in &mut pending {
                if self.upstream_in(name, &wanted).any(|u| u == next) {
                    *remaining -= 1;
                }
            }
            order.push(next.to_string());
        }
        order
    }
}
