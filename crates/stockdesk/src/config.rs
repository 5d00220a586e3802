//! Configuration loaded from a JSON file.
//!
//! ```json
//! {
//!   "cache_dir": "/var/lib/stockdesk",
//!   "source": { "base_url": "https://data.example.com/api" },
//!   "datasets": [
//!     { "name": "prices", "history_start": "2015-01-02",
//!       "columns": [{ "name": "close", "type": "float" }, { "name": "volume", "type": "float" }] }
//!   ],
//!   "engine": { "price_dataset": "prices", "stale_after_secs": 86400 }
//! }
//! ```
//!
//! The API token is never part of the file; it is read from the environment
//! variable named by `source.token_env`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stockdesk_cache::FileStore;
use stockdesk_core::{DeskError, Result};
use stockdesk_rest::RestSource;
use stockdesk_strategy::EngineConfig;
use tracing::debug;

use crate::catalog::{Catalog, DatasetSpec};

/// Default environment variable holding the provider token.
pub const DEFAULT_TOKEN_ENV: &str = "STOCKDESK_API_TOKEN";

/// External provider settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl SourceConfig {
    /// Settings for `base_url` with the default token variable and timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockdeskConfig {
    /// Directory of the file cache store.
    pub cache_dir: PathBuf,
    /// External provider.
    pub source: SourceConfig,
    /// Declared datasets.
    #[serde(default)]
    pub datasets: Vec<DatasetSpec>,
    /// Strategy engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl StockdeskConfig {
    /// Configuration with no datasets and default engine settings.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, source: SourceConfig) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source,
            datasets: Vec::new(),
            engine: EngineConfig::default(),
        }
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    /// Returns [`DeskError::Config`] for malformed JSON or an invalid catalog.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| DeskError::Config(e.to_string()))?;
        config.catalog()?;
        Ok(config)
    }

    /// Reads and validates a JSON file.
    ///
    /// # Errors
    /// Returns [`DeskError::Config`] if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DeskError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_json(&text)?;
        debug!(path = %path.display(), datasets = config.datasets.len(), "Configuration loaded");
        Ok(config)
    }

    /// Overrides the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Declares one more dataset.
    #[must_use]
    pub fn with_dataset(mut self, spec: DatasetSpec) -> Self {
        self.datasets.push(spec);
        self
    }

    /// Overrides the engine settings.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Validated dataset catalog.
    pub fn catalog(&self) -> Result<Catalog> {
        Catalog::new(self.datasets.iter().cloned())
    }

    /// Provider token from the environment, if set and non-empty.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.source.token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }

    /// HTTP source for the configured provider.
    ///
    /// Without a token the source sends no credentials.
    pub fn rest_source(&self) -> Result<RestSource> {
        let source = match self.token() {
            Some(token) => RestSource::new(&self.source.base_url, token),
            None => {
                debug!(token_env = %self.source.token_env, "No provider token, using anonymous access");
                RestSource::anonymous(&self.source.base_url)
            }
        };
        source.with_timeout(self.source.timeout())
    }

    /// File store rooted at `cache_dir`.
    pub fn file_store(&self) -> Result<FileStore> {
        FileStore::new(&self.cache_dir)
    }

    /// Engine settings with each dataset's maximum age filled in.
    ///
    /// Ages set explicitly under `engine.max_age_secs` take precedence.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        for spec in &self.datasets {
            engine
                .max_age_secs
                .entry(spec.name.clone())
                .or_insert(spec.max_age_secs);
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockdesk_strategy::Objective;

    const JSON: &str = r#"{
        "cache_dir": "/tmp/stockdesk",
        "source": { "base_url": "https://data.example.com/api/", "token_env": "STOCKDESK_TEST_TOKEN_UNSET" },
        "datasets": [
            { "name": "prices", "history_start": "2020-01-02", "max_age_secs": 3600,
              "columns": [{ "name": "close", "type": "float" }, { "name": "volume", "type": "float" }] },
            { "name": "revenue", "history_start": "2019-01-01", "depends_on": ["prices"],
              "columns": [{ "name": "revenue_yoy", "type": "float" }] }
        ],
        "engine": { "price_column": "close", "objective": "sharpe_ratio", "max_age_secs": { "revenue": 604800 } }
    }"#;

    #[test]
    fn test_from_json() {
        let config = StockdeskConfig::from_json(JSON).unwrap();
        assert_eq!(config.source.timeout_secs, 30);
        assert_eq!(config.datasets.len(), 2);
        assert_eq!(config.engine.objective, Objective::SharpeRatio);
        assert_eq!(config.engine.backtest.price_dataset, "prices");

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.get("revenue").unwrap().depends_on, vec!["prices".to_string()]);
    }

    #[test]
    fn test_engine_config_merges_dataset_ages() {
        let engine = StockdeskConfig::from_json(JSON).unwrap().engine_config();
        assert_eq!(engine.max_age("prices"), Duration::from_secs(3600));
        // Explicit engine override wins over the dataset declaration.
        assert_eq!(engine.max_age("revenue"), Duration::from_secs(604_800));
        assert_eq!(engine.max_age("other"), Duration::from_secs(86_400));
    }

    #[test]
    fn test_invalid_catalog_is_rejected() {
        let json = r#"{
            "cache_dir": "/tmp/stockdesk",
            "source": { "base_url": "http://localhost" },
            "datasets": [
                { "name": "a", "history_start": "2020-01-01", "depends_on": ["b"], "columns": [] },
                { "name": "b", "history_start": "2020-01-01", "depends_on": ["a"], "columns": [] }
            ]
        }"#;
        assert!(matches!(StockdeskConfig::from_json(json), Err(DeskError::Config(_))));
        assert!(matches!(StockdeskConfig::from_json("{"), Err(DeskError::Config(_))));
    }

    #[test]
    fn test_from_file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stockdesk.json");
        std::fs::write(&path, JSON).unwrap();

        let config = StockdeskConfig::from_file(&path)
            .unwrap()
            .with_cache_dir(dir.path().join("cache"));
        assert!(config.token().is_none());
        assert!(config.rest_source().is_ok());

        let store = config.file_store().unwrap();
        assert!(store.root().is_dir());

        let missing = StockdeskConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(DeskError::Config(_))));
    }
}
