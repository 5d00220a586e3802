//! Scheduled refresh of every declared dataset.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::loader::{DataLoader, LoadPolicy};

/// Outcome of warming one dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Fetched, merged and stored.
    Success,
    /// Loading failed; see [`DatasetReport::error`].
    Failure,
    /// Not attempted because an upstream dataset failed.
    Skipped {
        /// The failed (or skipped) upstream dataset.
        upstream: String,
    },
}

/// Per-dataset line of a [`Report`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatasetReport {
    /// Dataset name.
    pub name: String,
    /// What happened.
    pub outcome: Outcome,
    /// Rows newly added to the cache.
    pub rows_added: usize,
    /// Time spent on this dataset.
    pub elapsed: Duration,
    /// Error message of a failure.
    pub error: Option<String>,
}

/// Result of a [`CacheWarmer::warm_all`] run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Logical run date.
    pub as_of: NaiveDate,
    /// One line per requested dataset, in the order they were handled.
    pub datasets: Vec<DatasetReport>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl Report {
    /// Line of `name`, if it was requested.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DatasetReport> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// Number of successful datasets.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Success))
    }

    /// Number of failed datasets.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failure))
    }

    /// Number of skipped datasets.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    /// True if every dataset succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.succeeded() == self.datasets.len()
    }

    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.datasets.iter().filter(|d| f(&d.outcome)).count()
    }
}

type ProgressFn = dyn Fn(&str, f64) + Send + Sync;

/// Refreshes datasets ahead of use, typically once per trading day.
///
/// Each dataset is loaded with `max_age = 0` under
/// [`LoadPolicy::RequireFresh`], so a provider failure is recorded instead of
/// being papered over with stale data. One failure never aborts the run.
#[derive(Clone)]
pub struct CacheWarmer {
    loader: Arc<DataLoader>,
    on_progress: Option<Arc<ProgressFn>>,
}

impl std::fmt::Debug for CacheWarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("loader", &self.loader)
            .field("on_progress", &self.on_progress.as_ref().map(|_| "configured"))
            .finish()
    }
}

impl CacheWarmer {
    /// Creates a warmer driving `loader`.
    #[must_use]
    pub const fn new(loader: Arc<DataLoader>) -> Self {
        Self {
            loader,
            on_progress: None,
        }
    }

    /// Calls `f(name, fraction_done)` after each dataset.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(&str, f64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Refreshes every dataset in the loader's catalog.
    pub async fn warm_catalog(&self, as_of: NaiveDate) -> Report {
        let names: Vec<String> = self.loader.catalog().names().map(str::to_string).collect();
        self.warm_all(&names, as_of).await
    }

    /// Refreshes `names` as of the logical run date `as_of`.
    ///
    /// Datasets run dependencies first (ties by name). Dependents of a failed
    /// dataset are skipped. Names missing from the catalog are failures.
    #[instrument(skip(self, names), fields(datasets = names.len()))]
    pub async fn warm_all(&self, names: &[String], as_of: NaiveDate) -> Report {
        let started = Instant::now();
        let catalog = self.loader.catalog();
        let total = names.iter().collect::<BTreeSet<_>>().len();
        let mut datasets = Vec::with_capacity(total);

        let unknown: BTreeSet<&String> = names.iter().filter(|n| !catalog.contains(n)).collect();
        for name in unknown {
            warn!(dataset = %name, "Dataset not declared");
            datasets.push(DatasetReport {
                name: name.clone(),
                outcome: Outcome::Failure,
                rows_added: 0,
                elapsed: Duration::ZERO,
                error: Some(format!("dataset {name} is not declared")),
            });
            self.progress(name, datasets.len(), total);
        }

        let order = catalog.load_order(names);
        let requested: BTreeSet<String> = order.iter().cloned().collect();
        let mut bad: BTreeSet<String> = BTreeSet::new();

        for name in order {
            let begun = Instant::now();
            let blocked = catalog
                .upstream_in(&name, &requested)
                .find(|u| bad.contains(*u))
                .map(str::to_string);

            let line = match blocked {
                Some(upstream) => {
                    warn!(dataset = %name, upstream = %upstream, "Skipping dataset after upstream failure");
                    bad.insert(name.clone());
                    DatasetReport {
                        name,
                        outcome: Outcome::Skipped { upstream },
                        rows_added: 0,
                        elapsed: begun.elapsed(),
                        error: None,
                    }
                }
                None => match self
                    .loader
                    .load_with(&name, Duration::ZERO, LoadPolicy::RequireFresh, Some(as_of))
                    .await
                {
                    Ok(loaded) => DatasetReport {
                        name,
                        outcome: Outcome::Success,
                        rows_added: loaded.rows_added,
                        elapsed: begun.elapsed(),
                        error: None,
                    },
                    Err(e) => {
                        warn!(dataset = %name, error = %e, "Warming failed");
                        bad.insert(name.clone());
                        DatasetReport {
                            name,
                            outcome: Outcome::Failure,
                            rows_added: 0,
                            elapsed: begun.elapsed(),
                            error: Some(e.to_string()),
                        }
                    }
                },
            };
            datasets.push(line);
            if let Some(last) = datasets.last() {
                self.progress(&last.name, datasets.len(), total);
            }
        }

        let report = Report {
            as_of,
            datasets,
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cache warm run finished"
        );
        report
    }

    fn progress(&self, name: &str, done: usize, total: usize) {
        if let Some(f) = &self.on_progress {
            f(name, done as f64 / total.max(1) as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, DatasetSpec};
    use crate::loader::tests::{FakeSource, close_schema, day, prices};
    use std::sync::Mutex;
    use stockdesk_cache::InMemoryStore;
    use stockdesk_core::{CacheStore, Dataset, Record, Value};

    fn catalog() -> Catalog {
        Catalog::new([
            DatasetSpec::new("prices", close_schema(), day(1)),
            DatasetSpec::new("financials", close_schema(), day(1)),
            DatasetSpec::new("valuation", close_schema(), day(1)).depends_on(["financials"]),
        ])
        .unwrap()
    }

    fn dataset(name: &str) -> Dataset {
        Dataset::from_records(
            name,
            close_schema(),
            vec![Record::new("A", day(2), vec![Value::Float(1.0)])],
        )
        .unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_run() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::new());
        source.serve(prices(&[("A", 1, 10.0), ("B", 1, 20.0)]));
        source.fail("financials");
        let loader = Arc::new(DataLoader::new(store.clone(), source, catalog()));

        let report = CacheWarmer::new(loader)
            .warm_all(&names(&["prices", "financials"]), day(5))
            .await;

        let prices = report.get("prices").unwrap();
        assert_eq!(prices.outcome, Outcome::Success);
        assert_eq!(prices.rows_added, 2);
        let financials = report.get("financials").unwrap();
        assert_eq!(financials.outcome, Outcome::Failure);
        assert!(financials.error.as_deref().unwrap().contains("financials"));
        assert_eq!((report.succeeded(), report.failed()), (1, 1));
        assert!(!report.is_success());

        assert_eq!(store.metadata("prices").await.unwrap().unwrap().version, 1);
        assert!(store.metadata("financials").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dependents_of_failures_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::new());
        source.serve(dataset("valuation"));
        source.fail("financials");
        let loader = Arc::new(DataLoader::new(store, source.clone(), catalog()));

        let report = CacheWarmer::new(loader)
            .warm_all(&names(&["valuation", "financials", "quotes"]), day(5))
            .await;

        let order: Vec<&str> = report.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(order, vec!["quotes", "financials", "valuation"]);
        assert_eq!(report.get("quotes").unwrap().outcome, Outcome::Failure);
        assert_eq!(
            report.get("valuation").unwrap().outcome,
            Outcome::Skipped {
                upstream: "financials".into()
            }
        );
        assert_eq!(report.skipped(), 1);
        // Only financials reached the provider.
        assert_eq!(source.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_warm_ignores_freshness_and_reports_progress() {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(FakeSource::new());
        for name in ["prices", "financials", "valuation"] {
            source.serve(dataset(name));
        }
        let loader = Arc::new(DataLoader::new(store.clone(), source.clone(), catalog()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let warmer = CacheWarmer::new(loader).on_progress(move |name, fraction| {
            sink.lock().unwrap().push((name.to_string(), fraction));
        });

        let first = warmer.warm_catalog(day(5)).await;
        assert!(first.is_success());
        let second = warmer.warm_catalog(day(5)).await;
        assert!(second.is_success());

        // Every run goes to the provider even though the cache is fresh.
        assert_eq!(source.requests.lock().unwrap().len(), 6);
        assert_eq!(store.metadata("prices").await.unwrap().unwrap().version, 2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0].0, "financials");
        assert!((seen[2].1 - 1.0).abs() < 1e-12);
    }
}
