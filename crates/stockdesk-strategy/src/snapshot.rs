//! Point-in-time views over cached datasets.
//!
//! A [`Snapshot`] is the only handle a strategy gets on market data. Every
//! accessor is cut at the snapshot date, so a strategy evaluated on a
//! rebalance date cannot observe rows recorded after it.

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use stockdesk_core::{Dataset, DeskError, Record, Result, Symbol};

/// Datasets restricted to rows dated on or before [`Snapshot::date`].
#[derive(Clone, Copy, Debug)]
pub struct Snapshot<'a> {
    date: NaiveDate,
    datasets: &'a BTreeMap<String, Dataset>,
}

impl<'a> Snapshot<'a> {
    /// Creates a snapshot of `datasets` at `date`.
    #[must_use]
    pub const fn new(date: NaiveDate, datasets: &'a BTreeMap<String, Dataset>) -> Self {
        Self { date, datasets }
    }

    /// The decision date.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    fn dataset(&self, name: &str) -> Result<&'a Dataset> {
        self.datasets
            .get(name)
            .ok_or_else(|| DeskError::NotFound(name.to_string()))
    }

    fn column(&self, name: &str, column: &str) -> Result<(&'a Dataset, usize)> {
        let dataset = self.dataset(name)?;
        let index = dataset.schema().index_of(column).ok_or_else(|| {
            DeskError::schema(name, format!("no column {column}"))
        })?;
        Ok((dataset, index))
    }

    /// Rows of `name` dated on or before the snapshot date.
    pub fn rows(&self, name: &str) -> Result<&'a [Record]> {
        Ok(self.dataset(name)?.rows_until(self.date))
    }

    /// Most recent non-null numeric value of `column` per security.
    pub fn latest(&self, name: &str, column: &str) -> Result<BTreeMap<Symbol, f64>> {
        let (dataset, index) = self.column(name, column)?;
        let mut out = BTreeMap::new();
        for record in dataset.rows_until(self.date) {
            if let Some(v) = record.get(index).and_then(|v| v.as_f64()) {
                out.insert(record.symbol.clone(), v);
            }
        }
        Ok(out)
    }

    /// Numeric values of `column` for one security, oldest first.
    pub fn history(&self, name: &str, symbol: &Symbol, column: &str) -> Result<Vec<(NaiveDate, f64)>> {
        let (dataset, index) = self.column(name, column)?;
        Ok(dataset
            .rows_until(self.date)
            .iter()
            .filter(|r| &r.symbol == symbol)
            .filter_map(|r| r.get(index).and_then(|v| v.as_f64()).map(|v| (r.date, v)))
            .collect())
    }

    /// Numeric histories of `column` for every security, oldest first.
    pub fn histories(&self, name: &str, column: &str) -> Result<BTreeMap<Symbol, Vec<f64>>> {
        let (dataset, index) = self.column(name, column)?;
        let mut out: BTreeMap<Symbol, Vec<f64>> = BTreeMap::new();
        for record in dataset.rows_until(self.date) {
            if let Some(v) = record.get(index).and_then(|v| v.as_f64()) {
                out.entry(record.symbol.clone()).or_default().push(v);
            }
        }
        Ok(out)
    }

    /// Securities with a row in `name` within the last `within_days` days.
    ///
    /// Used to drop delisted or suspended securities from a universe.
    pub fn active_symbols(&self, name: &str, within_days: i64) -> Result<BTreeSet<Symbol>> {
        let cutoff = self.date - Duration::days(within_days);
        let rows = self.rows(name)?;
        let start = rows.partition_point(|r| r.date <= cutoff);
        Ok(rows[start..].iter().map(|r| r.symbol.clone()).collect())
    }
}
