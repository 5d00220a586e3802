//! Cache store trait for persisting datasets.
//!
//! This module defines the [`CacheStore`] trait together with the metadata
//! every stored entry carries ([`EntryMeta`]) and the value returned by reads
//! ([`CacheEntry`]).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    dataset::Dataset,
    error::{DeskError, Result},
    types::CoverageRange,
};

/// Metadata stored alongside each cached dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Dataset name.
    pub name: String,
    /// Counter bumped on every successful `put` of this name.
    pub version: u64,
    /// When the payload was fetched from its source.
    pub fetched_at: DateTime<Utc>,
    /// Provider-reported version of the data, if any.
    pub source_version: Option<String>,
    /// CRC32 of the stored payload, see [`Dataset::checksum`].
    pub checksum: u32,
    /// Dates covered by the payload.
    pub coverage: Option<CoverageRange>,
    /// Number of records.
    pub rows: usize,
}

impl EntryMeta {
    /// Describes `dataset` as stored under `version`.
    #[must_use]
    pub fn for_dataset(dataset: &Dataset, version: u64, source_version: Option<&str>) -> Self {
        Self {
            name: dataset.name().to_string(),
            version,
            fetched_at: dataset.last_updated(),
            source_version: source_version.map(str::to_string),
            checksum: dataset.checksum(),
            coverage: dataset.coverage(),
            rows: dataset.len(),
        }
    }

    /// Age of the entry at `now`. Entries stamped in the future have age zero.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// True if the entry is younger than `max_age` at `now`.
    ///
    /// A `max_age` of zero is never satisfied.
    #[must_use]
    pub fn is_fresh_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age_at(now) < max_age
    }

    /// True if the entry is younger than `max_age` right now.
    #[must_use]
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.is_fresh_at(max_age, Utc::now())
    }
}

/// A dataset read back from a [`CacheStore`].
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// Metadata of the stored entry.
    pub meta: EntryMeta,
    /// The payload.
    pub dataset: Dataset,
}

impl CacheEntry {
    /// Checks the payload against the stored checksum.
    pub fn verify(&self) -> Result<()> {
        let actual = self.dataset.checksum();
        if actual == self.meta.checksum {
            Ok(())
        } else {
            Err(DeskError::storage(
                &self.meta.name,
                format!(
                    "checksum mismatch (stored {:08x}, computed {:08x})",
                    self.meta.checksum, actual
                ),
            ))
        }
    }

    /// Restricts the payload to rows dated on or before `date`.
    ///
    /// `meta` keeps describing the stored entry, not the restricted view.
    #[must_use]
    pub fn as_of(self, date: Option<NaiveDate>) -> Self {
        match date {
            Some(date) => Self {
                dataset: self.dataset.as_of(date),
                meta: self.meta,
            },
            None => self,
        }
    }
}

/// Checks that `dataset` may be stored under `name`.
///
/// Shared by all store implementations so a rejected write never touches the
/// medium.
pub fn ensure_storable(name: &str, dataset: &Dataset) -> Result<()> {
    if dataset.name() != name {
        return Err(DeskError::schema(
            name,
            format!("dataset is named {}", dataset.name()),
        ));
    }
    dataset.validate()
}

/// Durable key-value persistence of datasets.
///
/// Implementations must make `put` atomic from a reader's point of view: a
/// concurrent `get` observes either the previous entry or the new one, never
/// a mixture. Writers to the same name are serialized; readers take no lock.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads the entry stored under `name`.
    ///
    /// Returns `Ok(None)` if nothing is stored. With `as_of = Some(d)` the
    /// payload is restricted to rows dated on or before `d`.
    async fn get(&self, name: &str, as_of: Option<NaiveDate>) -> Result<Option<CacheEntry>>;

    /// Replaces the entry stored under `name` and returns its new metadata.
    ///
    /// On failure the previous entry is left intact.
    async fn put(
        &self,
        name: &str,
        dataset: &Dataset,
        source_version: Option<&str>,
    ) -> Result<EntryMeta>;

    /// Reads only the metadata of the entry stored under `name`.
    async fn metadata(&self, name: &str) -> Result<Option<EntryMeta>>;

    /// True if an entry exists and is younger than `max_age`.
    async fn is_fresh(&self, name: &str, max_age: Duration) -> Result<bool> {
        Ok(self
            .metadata(name)
            .await?
            .is_some_and(|meta| meta.is_fresh(max_age)))
    }

    /// Metadata of every stored entry, ordered by name.
    async fn list(&self) -> Result<Vec<EntryMeta>>;

    /// Removes the entry stored under `name`. Returns true if one existed.
    async fn remove(&self, name: &str) -> Result<bool>;

    /// Removes entries older than `ttl`.
    ///
    /// Returns the number of entries invalidated.
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnType, Record, Schema, Value};

    fn dataset() -> Dataset {
        Dataset::from_records(
            "prices",
            Schema::of(&[("close", ColumnType::Float)]),
            vec![
                Record::new("A", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), vec![Value::Float(1.0)]),
                Record::new("A", NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), vec![Value::Float(2.0)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Utc::now();
        let ds = dataset().with_last_updated(now - chrono::Duration::hours(2));
        let meta = EntryMeta::for_dataset(&ds, 1, None);

        assert!(!meta.is_fresh_at(Duration::ZERO, now));
        assert!(!meta.is_fresh_at(Duration::from_secs(3600), now));
        assert!(meta.is_fresh_at(Duration::from_secs(3 * 3600), now));
    }

    #[test]
    fn test_future_stamp_counts_as_new() {
        let now = Utc::now();
        let ds = dataset().with_last_updated(now + chrono::Duration::minutes(5));
        let meta = EntryMeta::for_dataset(&ds, 1, None);
        assert_eq!(meta.age_at(now), Duration::ZERO);
        assert!(meta.is_fresh_at(Duration::from_secs(1), now));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let ds = dataset();
        let mut entry = CacheEntry {
            meta: EntryMeta::for_dataset(&ds, 3, Some("v1")),
            dataset: ds,
        };
        entry.verify().unwrap();

        entry.meta.checksum ^= 1;
        assert!(matches!(
            entry.verify(),
            Err(DeskError::StorageFailure { .. })
        ));
    }

    #[test]
    fn test_entry_as_of() {
        let ds = dataset();
        let entry = CacheEntry {
            meta: EntryMeta::for_dataset(&ds, 1, None),
            dataset: ds,
        };
        let cut = entry
            .clone()
            .as_of(Some(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()));
        assert_eq!(cut.dataset.len(), 1);
        assert_eq!(cut.meta.rows, 2);
        assert_eq!(entry.as_of(None).dataset.len(), 2);
    }

    #[test]
    fn test_ensure_storable_rejects_renamed_dataset() {
        let ds = dataset();
        assert!(ensure_storable("prices", &ds).is_ok());
        assert!(matches!(
            ensure_storable("financials", &ds),
            Err(DeskError::SchemaViolation { .. })
        ));
    }
}
