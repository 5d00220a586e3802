//! One handle over the write path (loader, warmer) and the read path (engine).

use chrono::NaiveDate;
use std::sync::Arc;
use stockdesk_core::{CacheStore, DataSource, Result};
use stockdesk_strategy::{EngineConfig, StrategyEngine, StrategyRegistry};
use tracing::debug;

use crate::{
    catalog::Catalog,
    config::StockdeskConfig,
    loader::DataLoader,
    warmer::{CacheWarmer, Report},
};

/// Loader, warmer and strategy engine sharing one cache store.
///
/// # Example
///
/// ```rust,ignore
/// use stockdesk::{Desk, DateRange, Params, StockdeskConfig};
///
/// let config = StockdeskConfig::from_file("stockdesk.json")?;
/// let desk = Desk::from_config(&config)?;
///
/// let report = desk.warm(chrono::Utc::now().date_naive()).await;
/// println!("{} refreshed, {} failed", report.succeeded(), report.failed());
///
/// let result = desk.engine().evaluate("value", &Params::new(), range).await?;
/// println!("{:?}", result.metrics);
/// ```
#[derive(Debug, Clone)]
pub struct Desk {
    loader: Arc<DataLoader>,
    warmer: CacheWarmer,
    engine: Arc<StrategyEngine>,
}

impl Desk {
    /// Wires the components over an explicit store and source.
    #[must_use]
    pub fn new(
        store: Arc<dyn CacheStore>,
        source: Arc<dyn DataSource>,
        catalog: Catalog,
        registry: StrategyRegistry,
        engine: EngineConfig,
    ) -> Self {
        let loader = Arc::new(DataLoader::new(store, source, catalog));
        Self::from_parts(loader, registry, engine)
    }

    fn from_parts(loader: Arc<DataLoader>, registry: StrategyRegistry, engine: EngineConfig) -> Self {
        let engine = StrategyEngine::new(Arc::clone(loader.store()), registry, engine);
        Self {
            warmer: CacheWarmer::new(Arc::clone(&loader)),
            loader,
            engine: Arc::new(engine),
        }
    }

    /// File store, HTTP source and built-in strategies as configured.
    ///
    /// # Errors
    /// Returns [`stockdesk_core::DeskError::Config`] for an invalid catalog or
    /// HTTP client, and [`stockdesk_core::DeskError::StorageFailure`] if the
    /// cache directory cannot be created.
    pub fn from_config(config: &StockdeskConfig) -> Result<Self> {
        let catalog = config.catalog()?;
        let store: Arc<dyn CacheStore> = Arc::new(config.file_store()?);
        let source: Arc<dyn DataSource> = Arc::new(config.rest_source()?);
        let loader = DataLoader::new(store, source, catalog).with_timeout(config.source.timeout());
        debug!(cache_dir = %config.cache_dir.display(), "Desk configured");
        Ok(Self::from_parts(
            Arc::new(loader),
            StrategyRegistry::with_builtins(),
            config.engine_config(),
        ))
    }

    /// Replaces the progress callback of the warmer.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(&str, f64) + Send + Sync + 'static) -> Self {
        self.warmer = self.warmer.on_progress(f);
        self
    }

    /// The data loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<DataLoader> {
        &self.loader
    }

    /// The cache warmer.
    #[must_use]
    pub const fn warmer(&self) -> &CacheWarmer {
        &self.warmer
    }

    /// The strategy engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<StrategyEngine> {
        &self.engine
    }

    /// Refreshes every declared dataset as of `as_of`.
    ///
    /// Memoized backtests need no clearing: new dataset versions change their keys.
    pub async fn warm(&self, as_of: NaiveDate) -> Report {
        self.warmer.warm_catalog(as_of).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetSpec;
    use crate::loader::tests::{FakeSource, close_schema, day, prices};
    use stockdesk_cache::InMemoryStore;
    use stockdesk_core::DeskError;
    use stockdesk_strategy::{DateRange, ParamSpec, Params, Pick, Snapshot, Strategy};

    /// Holds every symbol, highest close first.
    #[derive(Debug)]
    struct Highest;

    impl Strategy for Highest {
        fn name(&self) -> &str {
            "highest"
        }

        fn datasets(&self) -> Vec<String> {
            vec!["prices".into()]
        }

        fn params(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::top_n(1)]
        }

        fn select(&self, snapshot: &Snapshot<'_>, _params: &Params) -> Result<Vec<Pick>> {
            Ok(snapshot
                .latest("prices", "close")?
                .into_iter()
                .map(|(symbol, close)| Pick::new(symbol, close))
                .collect())
        }
    }

    fn desk(source: Arc<FakeSource>) -> Desk {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(Highest)).unwrap();
        let catalog = Catalog::new([DatasetSpec::new("prices", close_schema(), day(1))]).unwrap();
        Desk::new(
            Arc::new(InMemoryStore::new()),
            source,
            catalog,
            registry,
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_engine_reads_what_warmer_wrote() {
        let source = Arc::new(FakeSource::new());
        source.serve(prices(&[
            ("A", 1, 10.0),
            ("B", 1, 20.0),
            ("A", 4, 30.0),
            ("B", 4, 25.0),
        ]));
        let desk = desk(source);

        let before = desk.engine().select("highest", &Params::new(), None).await;
        assert!(matches!(before, Err(DeskError::NotFound(_))));

        let report = desk.warm(day(5)).await;
        assert!(report.is_success());

        let selected = desk.engine().select("highest", &Params::new(), None).await.unwrap();
        assert_eq!(selected.value.date, day(4));
        assert_eq!(
            selected.value.symbols().map(|s| s.as_str()).collect::<Vec<_>>(),
            vec!["A"]
        );
        assert_eq!(selected.version, 1);

        let range = DateRange::new(day(1), day(4)).unwrap();
        let result = desk.engine().evaluate("highest", &Params::new(), range).await.unwrap();
        assert_eq!(result.dataset_versions.get("prices"), Some(&1));
        assert!(!result.stale);
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StockdeskConfig::new(dir.path(), crate::config::SourceConfig::new("http://localhost:9"))
            .with_dataset(DatasetSpec::new("prices", close_schema(), day(1)));
        let desk = Desk::from_config(&config).unwrap();
        assert_eq!(desk.loader().catalog().len(), 1);
        assert_eq!(desk.engine().registry().len(), 4);
    }
}
