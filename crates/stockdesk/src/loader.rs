//! Cache-first dataset loading with incremental provider fetches.

use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stockdesk_core::{
    CacheEntry, CacheStore, DataSource, Dataset, DeskError, LoadOrigin, Loaded, Result,
};
use tracing::{debug, instrument, warn};

use crate::catalog::Catalog;

/// Default bound on a single provider request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when the provider fails and only stale data is cached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Serve the cached entry flagged `stale`.
    #[default]
    AllowStale,
    /// Surface the provider failure.
    RequireFresh,
}

/// Loads datasets through the cache store, fetching from the provider only
/// what is missing.
///
/// A fresh cache entry is returned without contacting the provider. Otherwise
/// the loader requests rows from the last cached date (or the dataset's
/// history start) to today, merges them into the cached rows last-write-wins,
/// validates the result against the catalog schema and stores it.
pub struct DataLoader {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn DataSource>,
    catalog: Arc<Catalog>,
    timeout: Duration,
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("source", &self.source.name())
            .field("datasets", &self.catalog.names().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DataLoader {
    /// Creates a loader over `store` and `source` for the datasets in `catalog`.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, source: Arc<dyn DataSource>, catalog: Catalog) -> Self {
        Self {
            store,
            source,
            catalog: Arc::new(catalog),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Sets the bound on a single provider request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Declared datasets.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The underlying cache store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Loads `name`, accepting a cached copy younger than `max_age`.
    ///
    /// Falls back to an older cached copy (`stale = true`) if the provider fails.
    pub async fn load(&self, name: &str, max_age: Duration) -> Result<Loaded<Dataset>> {
        self.load_with(name, max_age, LoadPolicy::AllowStale, None).await
    }

    /// Loads `name` with the maximum age declared in the catalog.
    pub async fn load_default(&self, name: &str) -> Result<Loaded<Dataset>> {
        let max_age = self.catalog.get(name)?.max_age();
        self.load(name, max_age).await
    }

    /// Loads `name`.
    ///
    /// `as_of` bounds the provider request end date (today by default).
    ///
    /// # Errors
    /// - [`DeskError::NotFound`] if `name` is not in the catalog.
    /// - [`DeskError::SchemaViolation`] if fetched rows do not fit the declared
    ///   schema; the cache is left unmodified.
    /// - [`DeskError::SourceUnavailable`] if the provider fails or times out and
    ///   no cached copy may be served under `policy`.
    /// - [`DeskError::StorageFailure`] if the merged dataset cannot be stored.
    #[instrument(skip(self), fields(dataset = %name))]
    pub async fn load_with(
        &self,
        name: &str,
        max_age: Duration,
        policy: LoadPolicy,
        as_of: Option<NaiveDate>,
    ) -> Result<Loaded<Dataset>> {
        let spec = self.catalog.get(name)?;
        let cached = match self.store.get(name, None).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cache entry");
                None
            }
        };

        if let Some(entry) = &cached {
            if entry.meta.is_fresh(max_age) {
                debug!(version = entry.meta.version, "Serving fresh cache entry");
                return Ok(Loaded {
                    value: entry.dataset.clone(),
                    stale: false,
                    origin: LoadOrigin::Cache,
                    rows_added: 0,
                    version: entry.meta.version,
                });
            }
        }

        let end = as_of.unwrap_or_else(|| Utc::now().date_naive());
        let start = cached
            .as_ref()
            .and_then(|e| e.dataset.coverage())
            .map_or(spec.history_start, |c| c.end)
            .min(end);

        let fetched = match self.fetch(name, start, end).await {
            Ok(frame) => frame,
            Err(e) => return self.fall_back(name, cached, policy, e),
        };

        let now = Utc::now();
        let schema = spec.schema();
        let (dataset, rows_added) = if fetched.height() == 0 {
            debug!(%start, %end, "Provider returned no rows");
            let base = cached
                .map(|e| e.dataset)
                .unwrap_or_else(|| Dataset::new(name, schema));
            (base.with_last_updated(now), 0)
        } else {
            let incoming = Dataset::from_frame(name, &schema, &fetched, now)?;
            match cached {
                Some(entry) => {
                    let (merged, stats) = entry.dataset.merge(&incoming)?;
                    debug!(added = stats.added, replaced = stats.replaced, "Merged incremental fetch");
                    (merged, stats.added)
                }
                None => {
                    let rows = incoming.len();
                    (incoming, rows)
                }
            }
        };

        let source_version = self.source.source_version();
        let meta = self.store.put(name, &dataset, source_version.as_deref()).await?;
        debug!(version = meta.version, rows = meta.rows, rows_added, "Dataset refreshed");

        Ok(Loaded {
            value: dataset,
            stale: false,
            origin: LoadOrigin::Provider,
            rows_added,
            version: meta.version,
        })
    }

    /// Loads several datasets, dependencies first, with their catalog maximum ages.
    ///
    /// Fails on the first dataset that cannot be loaded.
    pub async fn load_many(&self, names: &[String]) -> Result<BTreeMap<String, Loaded<Dataset>>> {
        if let Some(unknown) = names.iter().find(|n| !self.catalog.contains(n)) {
            return Err(DeskError::NotFound(unknown.clone()));
        }
        let mut out = BTreeMap::new();
        for name in self.catalog.load_order(names) {
            let loaded = self.load_default(&name).await?;
            out.insert(name, loaded);
        }
        Ok(out)
    }

    async fn fetch(&self, name: &str, start: NaiveDate, end: NaiveDate) -> Result<polars::prelude::DataFrame> {
        debug!(source = self.source.name(), %start, %end, "Fetching from provider");
        match tokio::time::timeout(self.timeout, self.source.fetch(name, start, end)).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e @ DeskError::SourceUnavailable { .. })) => Err(e),
            Ok(Err(e)) => Err(DeskError::source(name, e)),
            Err(_) => Err(DeskError::source(
                name,
                format!("no response within {:?}", self.timeout),
            )),
        }
    }

    fn fall_back(
        &self,
        name: &str,
        cached: Option<CacheEntry>,
        policy: LoadPolicy,
        error: DeskError,
    ) -> Result<Loaded<Dataset>> {
        match (cached, policy) {
            (Some(entry), LoadPolicy::AllowStale) => {
                warn!(
                    dataset = %name,
                    source = self.source.name(),
                    error = %error,
                    fetched_at = %entry.meta.fetched_at,
                    "Provider failed, serving stale cache entry"
                );
                Ok(Loaded {
                    value: entry.dataset,
                    stale: true,
                    origin: LoadOrigin::StaleFallback,
                    rows_added: 0,
                    version: entry.meta.version,
                })
            }
            _ => {
                warn!(dataset = %name, source = self.source.name(), error = %error, "Provider failed");
                Err(error)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::DatasetSpec;
    use async_trait::async_trait;
    use polars::prelude::DataFrame;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stockdesk_cache::InMemoryStore;
    use stockdesk_core::{ColumnType, Record, Schema, Value};

    pub(crate) fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    pub(crate) fn close_schema() -> Schema {
        Schema::of(&[("close", ColumnType::Float)])
    }

    /// Provider serving slices of in-memory "truth" datasets.
    #[derive(Debug, Default)]
    pub(crate) struct FakeSource {
        truth: Mutex<BTreeMap<String, Dataset>>,
        failing: Mutex<HashSet<String>>,
        delay: Option<Duration>,
        pub(crate) requests: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
        pub(crate) calls: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub(crate) fn serve(&self, dataset: Dataset) {
            self.truth
                .lock()
                .unwrap()
                .insert(dataset.name().to_string(), dataset);
        }

        pub(crate) fn fail(&self, name: &str) {
            self.failing.lock().unwrap().insert(name.to_string());
        }
    }

    #[async_trait]
    impl DataSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch(&self, dataset: &str, start: NaiveDate, end: NaiveDate) -> Result<DataFrame> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .unwrap()
                .push((dataset.to_string(), start, end));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().unwrap().contains(dataset) {
                return Err(DeskError::Network("connection reset".into()));
            }
            let slice = {
                let truth = self.truth.lock().unwrap();
                let full = truth
                    .get(dataset)
                    .ok_or_else(|| DeskError::Network(format!("404 for {dataset}")))?;
                Dataset::from_records(dataset, full.schema().clone(), full.rows_between(start, end).to_vec())?
            };
            slice.to_frame()
        }
    }

    pub(crate) fn prices(rows: &[(&str, u32, f64)]) -> Dataset {
        let records = rows
            .iter()
            .map(|(s, d, c)| Record::new(*s, day(*d), vec![Value::Float(*c)]))
            .collect();
        Dataset::from_records("prices", close_schema(), records).unwrap()
    }

    pub(crate) fn catalog() -> Catalog {
        Catalog::new([
            DatasetSpec::new("prices", close_schema(), day(1)),
            DatasetSpec::new("financials", close_schema(), day(1)).depends_on(["prices"]),
        ])
        .unwrap()
    }

    fn loader(store: Arc<InMemoryStore>, source: Arc<FakeSource>) -> DataLoader {
        DataLoader::new(store, source, catalog())
    }

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test]
    async fn test_empty_store_fetches_full_history() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::new());
        source.serve(prices(&[("A", 1, 10.0), ("A", 4, 11.0), ("B", 4, 20.0)]));
        let loader = loader(store.clone(), source.clone());

        let loaded = loader
            .load_with("prices", DAY, LoadPolicy::AllowStale, Some(day(10)))
            .await
            .unwrap();

        assert!(!loaded.stale);
        assert_eq!(loaded.origin, LoadOrigin::Provider);
        assert_eq!(loaded.rows_added, 3);
        assert_eq!(loaded.version, 1);
        assert_eq!(
            source.requests.lock().unwrap().as_slice(),
            &[("prices".to_string(), day(1), day(10))]
        );
        let stored = store.get("prices", None).await.unwrap().unwrap();
        assert_eq!(stored.dataset, loaded.value);
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_provider() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::new());
        source.serve(prices(&[("A", 1, 10.0)]));
        let loader = loader(store, source.clone());

        let first = loader.load("prices", Duration::ZERO).await.unwrap();
        let second = loader.load("prices", DAY).await.unwrap();

        assert_eq!(first.value, second.value);
        assert_eq!(second.origin, LoadOrigin::Cache);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_incremental_fetch_overwrites_overlap() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::new());
        source.serve(prices(&[("A", 1, 10.0), ("A", 4, 11.0)]));
        let loader = loader(store, source.clone());
        loader
            .load_with("prices", Duration::ZERO, LoadPolicy::AllowStale, Some(day(4)))
            .await
            .unwrap();

        // The provider revised day 4 and published day 5.
        source.serve(prices(&[("A", 1, 10.0), ("A", 4, 11.5), ("A", 5, 12.0)]));
        let loaded = loader
            .load_with("prices", Duration::ZERO, LoadPolicy::AllowStale, Some(day(5)))
            .await
            .unwrap();

        assert_eq!(source.requests.lock().unwrap()[1], ("prices".to_string(), day(4), day(5)));
        assert_eq!(loaded.rows_added, 1);
        assert_eq!(loaded.version, 2);
        let closes: Vec<f64> = loaded
            .value
            .records()
            .iter()
            .filter_map(|r| r.get(0).and_then(Value::as_f64))
            .collect();
        assert_eq!(closes, vec![10.0, 11.5, 12.0]);
    }

    #[tokio::test]
    async fn test_provider_failure_serves_stale_entry() {
        let store = Arc::new(InMemoryStore::new());
        let old = prices(&[("A", 1, 10.0)]).with_last_updated(Utc::now() - chrono::Duration::days(9));
        store.put("prices", &old, None).await.unwrap();
        let source = Arc::new(FakeSource::new());
        source.fail("prices");
        let loader = loader(store.clone(), source);

        let loaded = loader.load("prices", DAY).await.unwrap();
        assert!(loaded.stale);
        assert_eq!(loaded.origin, LoadOrigin::StaleFallback);
        assert_eq!(loaded.value, old);

        let strict = loader
            .load_with("prices", DAY, LoadPolicy::RequireFresh, None)
            .await;
        assert!(matches!(strict, Err(DeskError::SourceUnavailable { .. })));
        assert_eq!(store.metadata("prices").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_provider_failure_without_cache() {
        let source = Arc::new(FakeSource::new());
        source.fail("prices");
        let loader = loader(Arc::new(InMemoryStore::new()), source);
        let err = loader.load("prices", DAY).await.unwrap_err();
        assert!(matches!(err, DeskError::SourceUnavailable { ref dataset, .. } if dataset == "prices"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_source_failure() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::slow(Duration::from_millis(200)));
        source.serve(prices(&[("A", 1, 10.0)]));
        let loader = loader(store, source).with_timeout(Duration::from_millis(10));

        let err = loader.load("prices", DAY).await.unwrap_err();
        assert!(matches!(err, DeskError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_schema_violation_leaves_cache_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::new());
        let wrong = Dataset::from_records(
            "prices",
            Schema::of(&[("close", ColumnType::Text)]),
            vec![Record::new("A", day(2), vec![Value::Text("n/a".into())])],
        )
        .unwrap();
        source.serve(wrong);
        let loader = loader(store.clone(), source);

        let err = loader.load("prices", DAY).await.unwrap_err();
        assert!(matches!(err, DeskError::SchemaViolation { .. }));
        assert!(store.metadata("prices").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_many_and_unknown_names() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::new());
        source.serve(prices(&[("A", 1, 10.0)]));
        let financials = Dataset::from_records(
            "financials",
            close_schema(),
            vec![Record::new("A", day(1), vec![Value::Float(1.0)])],
        )
        .unwrap();
        source.serve(financials);
        let loader = loader(store, source.clone());

        let names = vec!["financials".to_string(), "prices".to_string()];
        let loaded = loader.load_many(&names).await.unwrap();
        assert_eq!(loaded.len(), 2);
        let order: Vec<String> = source.requests.lock().unwrap().iter().map(|r| r.0.clone()).collect();
        assert_eq!(order, vec!["prices", "financials"]);

        let unknown = loader.load("quotes", DAY).await;
        assert!(matches!(unknown, Err(DeskError::NotFound(_))));
    }
}
