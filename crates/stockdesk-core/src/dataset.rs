//! Named, time-indexed tables of security records.
//!
//! A [`Dataset`] keeps its records sorted by `(date, symbol)` with every key
//! present at most once. All constructors and [`Dataset::merge`] preserve that
//! invariant; [`Dataset::validate`] re-checks it together with the schema.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{DeskError, Result},
    types::{CoverageRange, Record, Schema, Symbol, Value},
};

/// A named table of `(symbol, date)`-keyed records sharing one schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    name: String,
    schema: Schema,
    last_updated: DateTime<Utc>,
    records: Vec<Record>,
}

/// Counts produced by [`Dataset::merge`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Keys that did not exist before the merge.
    pub added: usize,
    /// Existing keys whose values were overwritten by the incoming rows.
    pub replaced: usize,
}

impl Dataset {
    /// Creates an empty dataset stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            last_updated: Utc::now(),
            records: Vec::new(),
        }
    }

    /// Builds a dataset from unordered records.
    ///
    /// Records are sorted by `(date, symbol)`; a repeated key or a value that
    /// does not fit the schema is a [`DeskError::SchemaViolation`].
    pub fn from_records(
        name: impl Into<String>,
        schema: Schema,
        mut records: Vec<Record>,
    ) -> Result<Self> {
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        let dataset = Self {
            name: name.into(),
            schema,
            last_updated: Utc::now(),
            records,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Overrides the `last_updated` timestamp.
    #[must_use]
    pub fn with_last_updated(mut self, last_updated: DateTime<Utc>) -> Self {
        self.last_updated = last_updated;
        self
    }

    /// Dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared schema.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// When the data was last refreshed from its source.
    #[must_use]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Records in `(date, symbol)` order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the dataset holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Earliest and latest dates present.
    #[must_use]
    pub fn coverage(&self) -> Option<CoverageRange> {
        let start = self.records.first()?.date;
        let end = self.records.last()?.date;
        Some(CoverageRange { start, end })
    }

    /// Records dated on or before `date`.
    #[must_use]
    pub fn rows_until(&self, date: NaiveDate) -> &[Record] {
        let end = self.records.partition_point(|r| r.date <= date);
        &self.records[..end]
    }

    /// Records dated within `[start, end]`.
    #[must_use]
    pub fn rows_between(&self, start: NaiveDate, end: NaiveDate) -> &[Record] {
        let lo = self.records.partition_point(|r| r.date < start);
        let hi = self.records.partition_point(|r| r.date <= end);
        if lo >= hi { &[] } else { &self.records[lo..hi] }
    }

    /// A copy restricted to records dated on or before `date`.
    #[must_use]
    pub fn as_of(&self, date: NaiveDate) -> Self {
        Self {
            name: self.name.clone(),
            schema: self.schema.clone(),
            last_updated: self.last_updated,
            records: self.rows_until(date).to_vec(),
        }
    }

    /// Distinct dates present, ascending.
    #[must_use]
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.records.iter().map(|r| r.date).collect();
        dates.dedup();
        dates
    }

    /// Distinct symbols present.
    #[must_use]
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        self.records.iter().map(|r| r.symbol.clone()).collect()
    }

    /// Value of `column` in `record`, if the column exists.
    #[must_use]
    pub fn value<'a>(&self, record: &'a Record, column: &str) -> Option<&'a Value> {
        self.schema.index_of(column).and_then(|i| record.get(i))
    }

    /// Merges `incoming` into a copy of `self`, last write wins per key.
    ///
    /// Keys present only in `incoming` are appended; keys present in both take
    /// the incoming values. The result carries the later of both timestamps and is
    /// validated before it is returned, so a schema mismatch never yields a
    /// partially merged dataset.
    pub fn merge(&self, incoming: &Self) -> Result<(Self, MergeStats)> {
        if self.schema != incoming.schema {
            return Err(DeskError::schema(
                &self.name,
                "incoming rows use a different schema than the cached dataset",
            ));
        }

        let mut rows: BTreeMap<(NaiveDate, Symbol), Vec<Value>> = self
            .records
            .iter()
            .map(|r| ((r.date, r.symbol.clone()), r.values.clone()))
            .collect();

        let mut stats = MergeStats::default();
        for record in &incoming.records {
            let key = (record.date, record.symbol.clone());
            match rows.insert(key, record.values.clone()) {
                Some(_) => stats.replaced += 1,
                None => stats.added += 1,
            }
        }

        let merged = Self {
            name: self.name.clone(),
            schema: self.schema.clone(),
            last_updated: incoming.last_updated.max(self.last_updated),
            records: rows
                .into_iter()
                .map(|((date, symbol), values)| Record {
                    symbol,
                    date,
                    values,
                })
                .collect(),
        };
        merged.validate()?;
        Ok((merged, stats))
    }

    /// Checks schema conformance, ordering and key uniqueness.
    pub fn validate(&self) -> Result<()> {
        self.schema
            .check()
            .map_err(|reason| DeskError::schema(&self.name, reason))?;

        for (i, record) in self.records.iter().enumerate() {
            if record.values.len() != self.schema.len() {
                return Err(DeskError::schema(
                    &self.name,
                    format!(
                        "row {} ({} {}) has {} values, schema has {} columns",
                        i,
                        record.symbol,
                        record.date,
                        record.values.len(),
                        self.schema.len()
                    ),
                ));
            }
            for (value, column) in record.values.iter().zip(self.schema.columns()) {
                if !value.fits(column.kind) {
                    return Err(DeskError::schema(
                        &self.name,
                        format!(
                            "column {} expects {}, got {:?} for {} on {}",
                            column.name, column.kind, value, record.symbol, record.date
                        ),
                    ));
                }
            }
            if i > 0 {
                let prev = &self.records[i - 1];
                if prev.date > record.date {
                    return Err(DeskError::schema(
                        &self.name,
                        format!("dates not monotonic: {} after {}", record.date, prev.date),
                    ));
                }
                if prev.key() == record.key() {
                    return Err(DeskError::schema(
                        &self.name,
                        format!("duplicate key ({}, {})", record.symbol, record.date),
                    ));
                }
                if prev.key() > record.key() {
                    return Err(DeskError::schema(
                        &self.name,
                        format!("rows for {} out of symbol order", record.date),
                    ));
                }
            }
        }
        Ok(())
    }

    /// CRC32 of the serialized records and schema.
    ///
    /// Identical content always yields the same checksum, which makes it
    /// usable both for corruption checks and as a content version.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        if let Ok(bytes) = serde_json::to_vec(&self.schema) {
            hasher.update(&bytes);
        }
        if let Ok(bytes) = serde_json::to_vec(&self.records) {
            hasher.update(&bytes);
        }
        hasher.finalize()
    }
}
