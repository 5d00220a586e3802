//! Core value types for cached market data.
//!
//! This module defines the building blocks of a [`Dataset`](crate::Dataset):
//!
//! - [`Symbol`] - Security identifier
//! - [`ColumnType`] / [`ColumnSpec`] / [`Schema`] - Explicit schema descriptors
//! - [`Value`] - A single typed cell
//! - [`Record`] - One (security, date) row
//! - [`CoverageRange`] - Earliest/latest date present in a dataset
//! - [`Loaded`] - A payload tagged with its freshness

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A security identifier (ticker or exchange code).
///
/// Symbols are trimmed and uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string, converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Type of a dataset column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit floating point.
    Float,
    /// 64-bit signed integer.
    Int,
    /// UTF-8 text.
    Text,
    /// Boolean flag.
    Bool,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Text => "text",
            Self::Bool => "bool",
        };
        f.write_str(s)
    }
}

/// A named, typed column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Column type. Every column is nullable.
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

impl ColumnSpec {
    /// Creates a column descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered list of value columns of a dataset.
///
/// The `symbol` and `date` key columns are implicit and never listed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(Vec<ColumnSpec>);

impl Schema {
    /// Names reserved for the key columns.
    pub const RESERVED: [&'static str; 2] = ["symbol", "date"];

    /// Creates a schema from column descriptors.
    #[must_use]
    pub const fn new(columns: Vec<ColumnSpec>) -> Self {
        Self(columns)
    }

    /// Convenience constructor from `(name, type)` pairs.
    #[must_use]
    pub fn of(columns: &[(&str, ColumnType)]) -> Self {
        Self(
            columns
                .iter()
                .map(|(name, kind)| ColumnSpec::new(*name, *kind))
                .collect(),
        )
    }

    /// Returns the column descriptors in order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.0
    }

    /// Returns the number of value columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the schema has no value columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of the named column.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|c| c.name == name)
    }

    /// Checks the descriptor itself: unique, non-reserved, non-empty names.
    pub fn check(&self) -> Result<(), String> {
        for (i, column) in self.0.iter().enumerate() {
            if column.name.is_empty() {
                return Err(format!("column {i} has an empty name"));
            }
            if Self::RESERVED.contains(&column.name.as_str()) {
                return Err(format!("column name {} is reserved", column.name));
            }
            if self.0[..i].iter().any(|c| c.name == column.name) {
                return Err(format!("duplicate column {}", column.name));
            }
        }
        Ok(())
    }
}

/// A single cell value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl Value {
    /// Builds a float value, mapping NaN and infinities to [`Value::Null`].
    #[must_use]
    pub fn float(v: f64) -> Self {
        if v.is_finite() { Self::Float(v) } else { Self::Null }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value. Integers widen to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view of the value.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean view of the value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns true if this value may be stored in a column of `kind`.
    ///
    /// Nulls fit every column; integers are accepted by float columns.
    #[must_use]
    pub fn fits(&self, kind: ColumnType) -> bool {
        match (self, kind) {
            (Self::Null, _) => true,
            (Self::Float(v), ColumnType::Float) => v.is_finite(),
            (Self::Int(_), ColumnType::Float | ColumnType::Int) => true,
            (Self::Text(_), ColumnType::Text) => true,
            (Self::Bool(_), ColumnType::Bool) => true,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One row of a dataset, keyed by `(symbol, date)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Security the row belongs to.
    pub symbol: Symbol,
    /// Observation date.
    pub date: NaiveDate,
    /// Values in schema order.
    pub values: Vec<Value>,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, date: NaiveDate, values: Vec<Value>) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            values,
        }
    }

    /// The ordering key: date first, then symbol.
    #[must_use]
    pub fn key(&self) -> (NaiveDate, &Symbol) {
        (self.date, &self.symbol)
    }

    /// Value at a schema position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Earliest and latest dates present in a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoverageRange {
    /// First date present.
    pub start: NaiveDate,
    /// Last date present.
    pub end: NaiveDate,
}

impl CoverageRange {
    /// Returns true if `date` lies within the range (inclusive).
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for CoverageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.start, self.end)
    }
}

/// Where a loaded payload came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadOrigin {
    /// Served from a fresh cache entry; the provider was not contacted.
    Cache,
    /// Fetched from the provider, merged and persisted.
    Provider,
    /// The provider failed; an older cached entry was served instead.
    StaleFallback,
}

/// A payload together with its freshness.
///
/// Callers use `stale` to tell "computed from stale data" apart from a fresh
/// result; "unavailable" and "strategy error" are reported as `Err`.
#[derive(Clone, Debug, PartialEq)]
pub struct Loaded<T> {
    /// The payload.
    pub value: T,
    /// True when the payload is older than the caller's maximum age.
    pub stale: bool,
    /// Where the payload came from.
    pub origin: LoadOrigin,
    /// Rows newly added by this load (zero unless fetched).
    pub rows_added: usize,
    /// Cache entry version the payload corresponds to.
    pub version: u64,
}

impl<T> Loaded<T> {
    /// Maps the payload, keeping the freshness information.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loaded<U> {
        Loaded {
            value: f(self.value),
            stale: self.stale,
            origin: self.origin,
            rows_added: self.rows_added,
            version: self.version,
        }
    }
}
