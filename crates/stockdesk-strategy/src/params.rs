//! Strategy parameters, their declared ranges and parameter grids.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use stockdesk_core::{DeskError, Rebalance, Result};

/// Name of the rebalance frequency parameter shared by all strategies.
pub const REBALANCE: &str = "rebalance";
/// Name of the selection size parameter shared by all strategies.
pub const TOP_N: &str = "top_n";

/// A single parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean switch.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// One of a fixed set of choices.
    Text(String),
}

impl ParamValue {
    /// Numeric view. Integers widen to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Declared kind and valid range of a parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamKind {
    /// Float within `[min, max]`.
    Float {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Integer within `[min, max]`.
    Int {
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },
    /// One of the listed strings.
    Choice {
        /// Allowed values.
        options: Vec<String>,
    },
    /// Boolean switch.
    Bool,
}

/// A named parameter a strategy accepts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Kind and range.
    pub kind: ParamKind,
    /// Value used when the caller does not supply one.
    pub default: ParamValue,
    /// Human-readable description.
    pub description: String,
}

impl ParamSpec {
    /// Float parameter.
    #[must_use]
    pub fn float(name: &str, min: f64, max: f64, default: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Float { min, max },
            default: ParamValue::Float(default),
            description: description.to_string(),
        }
    }

    /// Integer parameter.
    #[must_use]
    pub fn int(name: &str, min: i64, max: i64, default: i64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Int { min, max },
            default: ParamValue::Int(default),
            description: description.to_string(),
        }
    }

    /// Choice parameter.
    #[must_use]
    pub fn choice(name: &str, options: &[&str], default: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Choice {
                options: options.iter().map(|s| (*s).to_string()).collect(),
            },
            default: ParamValue::Text(default.to_string()),
            description: description.to_string(),
        }
    }

    /// Boolean parameter.
    #[must_use]
    pub fn flag(name: &str, default: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Bool,
            default: ParamValue::Bool(default),
            description: description.to_string(),
        }
    }

    /// The `rebalance` parameter (`D`, `W`, `M` or `Q`).
    #[must_use]
    pub fn rebalance(default: Rebalance) -> Self {
        Self::choice(
            REBALANCE,
            &["D", "W", "M", "Q"],
            default.code(),
            "Rebalance frequency",
        )
    }

    /// The `top_n` parameter.
    #[must_use]
    pub fn top_n(default: i64) -> Self {
        Self::int(TOP_N, 1, 500, default, "Maximum number of holdings")
    }

    /// Checks the declaration itself: non-empty range or choices, default in range.
    pub fn check(&self) -> Result<()> {
        let bad = |reason: String| DeskError::InvalidParameter(format!("{}: {reason}", self.name));
        if self.name.is_empty() {
            return Err(DeskError::InvalidParameter("parameter with empty name".into()));
        }
        match &self.kind {
            ParamKind::Float { min, max } if !(min.is_finite() && max.is_finite() && min <= max) => {
                return Err(bad(format!("invalid range [{min}, {max}]")));
            }
            ParamKind::Int { min, max } if min > max => {
                return Err(bad(format!("invalid range [{min}, {max}]")));
            }
            ParamKind::Choice { options } if options.is_empty() => {
                return Err(bad("no choices declared".into()));
            }
            _ => {}
        }
        self.coerce(&self.default)
            .map(|_| ())
            .map_err(|e| bad(format!("default rejected: {e}")))
    }

    /// Validates `value` against the declared kind, widening integers for floats.
    pub fn coerce(&self, value: &ParamValue) -> Result<ParamValue> {
        let out_of_range = || {
            DeskError::InvalidParameter(format!(
                "{} = {value} is outside its declared range",
                self.name
            ))
        };
        match (&self.kind, value) {
            (ParamKind::Float { min, max }, ParamValue::Float(_) | ParamValue::Int(_)) => {
                let v = value.as_f64().ok_or_else(out_of_range)?;
                if v.is_finite() && *min <= v && v <= *max {
                    Ok(ParamValue::Float(v))
                } else {
                    Err(out_of_range())
                }
            }
            (ParamKind::Int { min, max }, ParamValue::Int(v)) => {
                if min <= v && v <= max {
                    Ok(value.clone())
                } else {
                    Err(out_of_range())
                }
            }
            (ParamKind::Choice { options }, ParamValue::Text(v)) => {
                if options.iter().any(|o| o == v) {
                    Ok(value.clone())
                } else {
                    Err(DeskError::InvalidParameter(format!(
                        "{} = {v} is not one of {}",
                        self.name,
                        options.join(", ")
                    )))
                }
            }
            (ParamKind::Bool, ParamValue::Bool(_)) => Ok(value.clone()),
            _ => Err(DeskError::InvalidParameter(format!(
                "{} has the wrong type: {value}",
                self.name
            ))),
        }
    }
}

/// Validated parameters of one strategy run, ordered by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a value.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    /// Sets a value.
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    /// Raw value lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Iterates in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Float value of `name`.
    pub fn float(&self, name: &str) -> Result<f64> {
        self.get(name)
            .and_then(ParamValue::as_f64)
            .ok_or_else(|| DeskError::InvalidParameter(format!("{name} is not a number")))
    }

    /// Integer value of `name`.
    pub fn int(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(ParamValue::Int(v)) => Ok(*v),
            _ => Err(DeskError::InvalidParameter(format!("{name} is not an integer"))),
        }
    }

    /// Boolean value of `name`, `default` if absent.
    #[must_use]
    pub fn flag(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => *v,
            _ => default,
        }
    }

    /// Rebalance frequency; monthly when the strategy declares none.
    pub fn rebalance(&self) -> Result<Rebalance> {
        match self.get(REBALANCE) {
            Some(ParamValue::Text(code)) => code.parse().map_err(DeskError::InvalidParameter),
            Some(other) => Err(DeskError::InvalidParameter(format!(
                "{REBALANCE} must be one of D, W, M, Q, got {other}"
            ))),
            None => Ok(Rebalance::default()),
        }
    }

    /// Selection size; `None` keeps every pick.
    pub fn top_n(&self) -> Result<Option<usize>> {
        match self.get(TOP_N) {
            None => Ok(None),
            Some(_) => {
                let n = self.int(TOP_N)?;
                usize::try_from(n)
                    .map(Some)
                    .map_err(|_| DeskError::InvalidParameter(format!("{TOP_N} = {n}")))
            }
        }
    }

    /// Stable text form used as a memoization key.
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Fills defaults and validates `given` against `specs`.
    ///
    /// Unknown names and out-of-range values are [`DeskError::InvalidParameter`].
    pub fn resolve(specs: &[ParamSpec], given: &Self) -> Result<Self> {
        for name in given.0.keys() {
            if !specs.iter().any(|s| &s.name == name) {
                return Err(DeskError::InvalidParameter(format!("unknown parameter {name}")));
            }
        }
        let mut out = BTreeMap::new();
        for spec in specs {
            let value = match given.get(&spec.name) {
                Some(v) => spec.coerce(v)?,
                None => spec.default.clone(),
            };
            out.insert(spec.name.clone(), value);
        }
        Ok(Self(out))
    }
}

impl FromIterator<(String, ParamValue)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Candidate values per parameter, expanded into a cartesian product.
///
/// Grid order is deterministic: parameters are taken in name order and the
/// last name varies fastest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamGrid(BTreeMap<String, Vec<ParamValue>>);

impl ParamGrid {
    /// Creates an empty grid (a single point of all defaults).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds candidate values for `name`.
    #[must_use]
    pub fn with<V: Into<ParamValue>>(mut self, name: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.0
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Adds `start, start + step, ... <= end` for `name`.
    ///
    /// Non-finite bounds or a non-positive step add no values, which leaves
    /// the grid empty.
    #[must_use]
    pub fn with_range(self, name: &str, start: f64, end: f64, step: f64) -> Self {
        let mut values = Vec::new();
        if start.is_finite() && end.is_finite() && step.is_finite() && step > 0.0 {
            let mut i = 0u32;
            loop {
                let v = f64::from(i).mul_add(step, start);
                if v > end + step * 1e-9 {
                    break;
                }
                values.push(v);
                i += 1;
            }
        }
        self.with(name, values)
    }

    /// Number of grid points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).product()
    }

    /// True if some parameter has no candidate values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expands the grid into parameter sets in grid order.
    #[must_use]
    pub fn combinations(&self) -> Vec<Params> {
        let mut out = vec![Params::new()];
        for (name, values) in &self.0 {
            let mut next = Vec::with_capacity(out.len() * values.len());
            for partial in &out {
                for value in values {
                    next.push(partial.clone().with(name, value.clone()));
                }
            }
            out = next;
        }
        out
    }
}
