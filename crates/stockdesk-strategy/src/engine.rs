//! Strategy engine: evaluation, parameter sweeps and single-date screens.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stockdesk_core::{CacheStore, Dataset, DeskError, LoadOrigin, Loaded, Result};
use tracing::{debug, instrument, warn};

use crate::{
    backtest::{BacktestResult, BacktestSettings, DateRange, Objective, run_backtest, select_at},
    params::{ParamGrid, Params},
    selection::Selection,
    strategy::{Strategy, StrategyRegistry},
};

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Calendar, pricing and cost settings of every backtest.
    #[serde(flatten)]
    pub backtest: BacktestSettings,
    /// Age after which an input dataset marks results stale.
    pub stale_after_secs: u64,
    /// Per-dataset overrides of `stale_after_secs`.
    pub max_age_secs: BTreeMap<String, u64>,
    /// Ranking used by [`StrategyEngine::optimize`].
    pub objective: Objective,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backtest: BacktestSettings::default(),
            stale_after_secs: 24 * 60 * 60,
            max_age_secs: BTreeMap::new(),
            objective: Objective::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the maximum age of `dataset`.
    #[must_use]
    pub fn with_max_age(mut self, dataset: &str, max_age: Duration) -> Self {
        self.max_age_secs.insert(dataset.to_string(), max_age.as_secs());
        self
    }

    /// Sets the optimization objective.
    #[must_use]
    pub const fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    /// Maximum age of `dataset` before results computed from it are stale.
    #[must_use]
    pub fn max_age(&self, dataset: &str) -> Duration {
        Duration::from_secs(
            self.max_age_secs
                .get(dataset)
                .copied()
                .unwrap_or(self.stale_after_secs),
        )
    }
}

/// Identifies a computation: same key, same result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct MemoKey {
    strategy: String,
    params: String,
    range: DateRange,
    inputs: Vec<(String, u64, u32)>,
}

impl MemoKey {
    /// True if `current` holds a different version of any input of this key.
    fn superseded_by(&self, current: &[(String, u64, u32)]) -> bool {
        self.inputs.iter().any(|(name, version, checksum)| {
            current
                .iter()
                .any(|(n, v, c)| n == name && (v, c) != (version, checksum))
        })
    }
}

/// One split of a walk-forward analysis.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WalkForwardWindow {
    /// In-sample range the grid is optimized on.
    pub train: DateRange,
    /// Out-of-sample range that follows it.
    pub test: DateRange,
    /// Best grid point over `train`.
    pub in_sample: BacktestResult,
    /// The same parameters evaluated over `test`.
    pub out_of_sample: BacktestResult,
}

/// Result of [`StrategyEngine::walk_forward`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WalkForward {
    /// Ranking used to pick each window's parameters.
    pub objective: Objective,
    /// Splits in date order.
    pub windows: Vec<WalkForwardWindow>,
}

impl WalkForward {
    /// Mean in-sample objective score.
    #[must_use]
    pub fn avg_in_sample(&self) -> f64 {
        self.mean(|w| &w.in_sample)
    }

    /// Mean out-of-sample objective score.
    #[must_use]
    pub fn avg_out_of_sample(&self) -> f64 {
        self.mean(|w| &w.out_of_sample)
    }

    /// Out-of-sample over in-sample mean score, 0 when the in-sample mean is 0.
    #[must_use]
    pub fn efficiency(&self) -> f64 {
        let in_sample = self.avg_in_sample();
        if in_sample == 0.0 {
            0.0
        } else {
            self.avg_out_of_sample() / in_sample
        }
    }

    /// True if any window was computed from a stale dataset.
    #[must_use]
    pub fn stale(&self) -> bool {
        self.windows
            .iter()
            .any(|w| w.in_sample.stale || w.out_of_sample.stale)
    }

    fn mean(&self, pick: impl Fn(&WalkForwardWindow) -> &BacktestResult) -> f64 {
        if self.windows.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .windows
            .iter()
            .map(|w| self.objective.score(&pick(w).metrics))
            .sum();
        total / self.windows.len() as f64
    }
}

/// Datasets read from the cache for one request.
#[derive(Debug)]
struct Inputs {
    datasets: Arc<BTreeMap<String, Dataset>>,
    versions: BTreeMap<String, u64>,
    fingerprint: Vec<(String, u64, u32)>,
    stale: bool,
}

/// Evaluates registered strategies against cached datasets.
///
/// The engine only reads the cache store. Results are memoized by strategy,
/// parameters, date range and input dataset versions, so a new version of any
/// input invalidates them. Invalidated results are dropped the next time a
/// result computed from the newer version is stored.
pub struct StrategyEngine {
    store: Arc<dyn CacheStore>,
    registry: StrategyRegistry,
    config: EngineConfig,
    memo: Mutex<HashMap<MemoKey, BacktestResult>>,
}

impl std::fmt::Debug for StrategyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("memoized", &self.memo_len())
            .finish_non_exhaustive()
    }
}

impl StrategyEngine {
    /// Creates an engine reading from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, registry: StrategyRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Registered strategies.
    #[must_use]
    pub const fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of memoized backtests.
    #[must_use]
    pub fn memo_len(&self) -> usize {
        self.memo.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Drops every memoized backtest.
    pub fn clear_memo(&self) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.clear();
        }
    }

    fn resolve(&self, name: &str, params: &Params) -> Result<(Arc<dyn Strategy>, Params)> {
        let strategy = self.registry.get(name)?;
        let params = Params::resolve(&strategy.params(), params)?;
        Ok((strategy, params))
    }

    fn backtest_datasets(&self, strategy: &dyn Strategy) -> Vec<String> {
        let mut names: BTreeSet<String> = strategy.datasets().into_iter().collect();
        names.insert(self.config.backtest.price_dataset.clone());
        names.into_iter().collect()
    }

    async fn load_inputs(&self, names: &[String]) -> Result<Inputs> {
        let mut datasets = BTreeMap::new();
        let mut versions = BTreeMap::new();
        let mut fingerprint = Vec::with_capacity(names.len());
        let mut stale = false;

        for name in names {
            let entry = self
                .store
                .get(name, None)
                .await?
                .ok_or_else(|| DeskError::NotFound(name.clone()))?;
            if !entry.meta.is_fresh(self.config.max_age(name)) {
                warn!(dataset = %name, fetched_at = %entry.meta.fetched_at, "Evaluating on stale dataset");
                stale = true;
            }
            versions.insert(name.clone(), entry.meta.version);
            fingerprint.push((name.clone(), entry.meta.version, entry.meta.checksum));
            datasets.insert(name.clone(), entry.dataset);
        }

        Ok(Inputs {
            datasets: Arc::new(datasets),
            versions,
            fingerprint,
            stale,
        })
    }

    fn memo_key(strategy: &str, params: &Params, range: DateRange, inputs: &Inputs) -> MemoKey {
        MemoKey {
            strategy: strategy.to_string(),
            params: params.cache_key(),
            range,
            inputs: inputs.fingerprint.clone(),
        }
    }

    fn memo_get(&self, key: &MemoKey) -> Option<BacktestResult> {
        self.memo.lock().ok().and_then(|m| m.get(key).cloned())
    }

    fn memo_put(&self, key: MemoKey, result: &BacktestResult) {
        if let Ok(mut memo) = self.memo.lock() {
            let before = memo.len();
            memo.retain(|k, _| !k.superseded_by(&key.inputs));
            if memo.len() < before {
                debug!(evicted = before - memo.len(), "Dropped memoized backtests of old dataset versions");
            }
            memo.insert(key, result.clone());
        }
    }

    /// Evaluates `strategy` over `range` with `params` (defaults filled in).
    ///
    /// Fails with [`DeskError::UnknownStrategy`], [`DeskError::InvalidParameter`],
    /// [`DeskError::NotFound`] for an input dataset missing from the cache, or
    /// [`DeskError::StrategyEvaluationFailure`] carrying the rebalance date the
    /// strategy failed on.
    #[instrument(skip(self, params), fields(strategy = %name, range = %range))]
    pub async fn evaluate(&self, name: &str, params: &Params, range: DateRange) -> Result<BacktestResult> {
        let (strategy, params) = self.resolve(name, params)?;
        let inputs = self.load_inputs(&self.backtest_datasets(strategy.as_ref())).await?;
        let key = Self::memo_key(name, &params, range, &inputs);

        if let Some(mut hit) = self.memo_get(&key) {
            debug!("Backtest memo hit");
            hit.stale = inputs.stale;
            return Ok(hit);
        }

        let datasets = Arc::clone(&inputs.datasets);
        let settings = self.config.backtest.clone();
        let mut result = tokio::task::spawn_blocking(move || {
            run_backtest(strategy.as_ref(), &params, &datasets, range, &settings)
        })
        .await
        .map_err(|e| DeskError::StrategyEvaluationFailure {
            strategy: name.to_string(),
            date: range.start,
            reason: e.to_string(),
        })??;

        result.dataset_versions = inputs.versions.clone();
        self.memo_put(key, &result);
        result.stale = inputs.stale;
        debug!(periods = result.periods.len(), "Backtest complete");
        Ok(result)
    }

    /// Evaluates every point of `grid`, ranked by the configured objective.
    pub async fn optimize(&self, name: &str, grid: &ParamGrid, range: DateRange) -> Result<Vec<BacktestResult>> {
        self.optimize_by(name, grid, range, self.config.objective).await
    }

    /// Evaluates every point of `grid`, ranked by `objective` descending.
    ///
    /// Ties are broken by lower volatility, then by grid order. Every grid
    /// point is validated before any is evaluated; the first failing point
    /// fails the whole sweep.
    #[instrument(skip(self, grid), fields(strategy = %name, range = %range, points = grid.len()))]
    pub async fn optimize_by(
        &self,
        name: &str,
        grid: &ParamGrid,
        range: DateRange,
        objective: Objective,
    ) -> Result<Vec<BacktestResult>> {
        let strategy = self.registry.get(name)?;
        let specs = strategy.params();
        let points = grid
            .combinations()
            .iter()
            .map(|p| Params::resolve(&specs, p))
            .collect::<Result<Vec<_>>>()?;

        let inputs = self.load_inputs(&self.backtest_datasets(strategy.as_ref())).await?;

        let mut done: Vec<(usize, BacktestResult)> = Vec::with_capacity(points.len());
        let mut pending: Vec<(usize, Params)> = Vec::new();
        for (i, params) in points.into_iter().enumerate() {
            match self.memo_get(&Self::memo_key(name, &params, range, &inputs)) {
                Some(hit) => done.push((i, hit)),
                None => pending.push((i, params)),
            }
        }
        debug!(memoized = done.len(), pending = pending.len(), "Running parameter sweep");

        let datasets = Arc::clone(&inputs.datasets);
        let settings = self.config.backtest.clone();
        let task_strategy = Arc::clone(&strategy);
        let computed = tokio::task::spawn_blocking(move || {
            pending
                .par_iter()
                .map(|(i, params)| {
                    run_backtest(task_strategy.as_ref(), params, &datasets, range, &settings)
                        .map(|r| (*i, r))
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| DeskError::StrategyEvaluationFailure {
            strategy: name.to_string(),
            date: range.start,
            reason: e.to_string(),
        })??;

        for (i, mut result) in computed {
            result.dataset_versions = inputs.versions.clone();
            self.memo_put(Self::memo_key(name, &result.params, range, &inputs), &result);
            done.push((i, result));
        }

        rank(&mut done, objective);
        Ok(done
            .into_iter()
            .map(|(_, mut r)| {
                r.stale = inputs.stale;
                r
            })
            .collect())
    }

    /// Walk-forward analysis of `grid` over `range`.
    ///
    /// `range` is split into `train_months` windows each followed by a
    /// `test_months` window (see [`DateRange::walk_forward`]). The grid is
    /// optimized by the configured objective on every training window and
    /// its best point is evaluated on the test window that follows.
    ///
    /// Fails with [`DeskError::InvalidParameter`] if `range` holds no
    /// complete split or the grid is empty, and otherwise like
    /// [`optimize`](Self::optimize) and [`evaluate`](Self::evaluate).
    #[instrument(skip(self, grid), fields(strategy = %name, range = %range, points = grid.len()))]
    pub async fn walk_forward(
        &self,
        name: &str,
        grid: &ParamGrid,
        range: DateRange,
        train_months: u32,
        test_months: u32,
    ) -> Result<WalkForward> {
        let splits = range.walk_forward(train_months, test_months);
        if splits.is_empty() {
            return Err(DeskError::InvalidParameter(format!(
                "date range {range} holds no {train_months}+{test_months} month walk-forward window"
            )));
        }

        let objective = self.config.objective;
        let mut windows = Vec::with_capacity(splits.len());
        for (train, test) in splits {
            let in_sample = self
                .optimize_by(name, grid, train, objective)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| DeskError::InvalidParameter(format!("{name}: empty parameter grid")))?;
            let out_of_sample = self.evaluate(name, &in_sample.params, test).await?;
            debug!(
                train = %train,
                test = %test,
                in_sample = objective.score(&in_sample.metrics),
                out_of_sample = objective.score(&out_of_sample.metrics),
                "Walk-forward window"
            );
            windows.push(WalkForwardWindow {
                train,
                test,
                in_sample,
                out_of_sample,
            });
        }

        let report = WalkForward { objective, windows };
        debug!(
            windows = report.windows.len(),
            efficiency = report.efficiency(),
            "Walk-forward complete"
        );
        Ok(report)
    }

    /// Runs `strategy` once at `as_of`, or at the latest date of its inputs.
    ///
    /// The returned version is that of the strategy's first declared dataset.
    #[instrument(skip(self, params), fields(strategy = %name))]
    pub async fn select(&self, name: &str, params: &Params, as_of: Option<NaiveDate>) -> Result<Loaded<Selection>> {
        let (strategy, params) = self.resolve(name, params)?;
        let names = strategy.datasets();
        let inputs = self.load_inputs(&names).await?;

        let date = match as_of {
            Some(date) => date,
            None => inputs
                .datasets
                .values()
                .filter_map(|d| d.coverage().map(|c| c.end))
                .max()
                .ok_or_else(|| DeskError::NotFound(format!("{name}: no input rows")))?,
        };

        let selection = select_at(strategy.as_ref(), &params, &inputs.datasets, date)?;
        let version = names
            .first()
            .and_then(|n| inputs.versions.get(n))
            .copied()
            .unwrap_or(0);
        debug!(date = %date, picks = selection.len(), "Selection complete");

        Ok(Loaded {
            value: selection,
            stale: inputs.stale,
            origin: LoadOrigin::Cache,
            rows_added: 0,
            version,
        })
    }
}

/// Sorts `(grid index, result)` pairs best first.
fn rank(results: &mut [(usize, BacktestResult)], objective: Objective) {
    results.sort_by(|(ia, a), (ib, b)| {
        objective
            .score(&b.metrics)
            .total_cmp(&objective.score(&a.metrics))
            .then_with(|| a.metrics.volatility.total_cmp(&b.metrics.volatility))
            .then_with(|| ia.cmp(ib))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metrics::Metrics,
        params::{ParamSpec, ParamValue},
        selection::Pick,
        snapshot::Snapshot,
    };
    use chrono::Utc;
    use stockdesk_cache::InMemoryStore;
    use stockdesk_core::{ColumnType, Rebalance, Record, Schema, Value};

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    /// A doubles over the range, B gains 10%, C is flat.
    fn prices(scale: f64) -> Dataset {
        let days = [d(1, 2), d(2, 1), d(3, 1), d(3, 29)];
        let mut records = Vec::new();
        for (i, date) in days.iter().enumerate() {
            let step = i as f64 / 3.0;
            records.push(Record::new("A", *date, vec![Value::Float(scale * (100.0 + 100.0 * step))]));
            records.push(Record::new("B", *date, vec![Value::Float(scale * (100.0 + 10.0 * step))]));
            records.push(Record::new("C", *date, vec![Value::Float(scale * 100.0)]));
        }
        Dataset::from_records("prices", Schema::of(&[("close", ColumnType::Float)]), records).unwrap()
    }

    /// Holds the single security named by its `symbol` parameter.
    #[derive(Debug)]
    struct Hold;

    impl Strategy for Hold {
        fn name(&self) -> &str {
            "hold"
        }

        fn datasets(&self) -> Vec<String> {
            vec!["prices".into()]
        }

        fn params(&self) -> Vec<ParamSpec> {
            vec![
                ParamSpec::choice("symbol", &["A", "B", "C", "Z"], "A", "Security to hold"),
                ParamSpec::flag("noise", false, "Ignored"),
                ParamSpec::rebalance(Rebalance::Monthly),
                ParamSpec::top_n(5),
            ]
        }

        fn select(&self, snapshot: &Snapshot<'_>, params: &Params) -> Result<Vec<Pick>> {
            let Some(ParamValue::Text(symbol)) = params.get("symbol") else {
                return Err(DeskError::InvalidParameter("symbol".into()));
            };
            if symbol == "Z" {
                return Err(DeskError::InvalidParameter("cannot hold Z".into()));
            }
            let latest = snapshot.latest("prices", "close")?;
            Ok(latest
                .keys()
                .filter(|s| s.as_str() == symbol)
                .map(|s| Pick::new(s.clone(), 1.0))
                .collect())
        }
    }

    async fn setup(config: EngineConfig) -> (StrategyEngine, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.put("prices", &prices(1.0), None).await.unwrap();
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(Hold)).unwrap();
        let config = EngineConfig {
            backtest: BacktestSettings {
                costs: crate::backtest::TradingCosts::free(),
                ..BacktestSettings::default()
            },
            ..config
        };
        (StrategyEngine::new(store.clone(), registry, config), store)
    }

    fn range() -> DateRange {
        DateRange::new(d(1, 1), d(3, 31)).unwrap()
    }

    #[tokio::test]
    async fn test_evaluate_is_deterministic_and_memoized() {
        let (engine, _) = setup(EngineConfig::default()).await;
        let params = Params::new().with("symbol", "A");

        let first = engine.evaluate("hold", &params, range()).await.unwrap();
        let second = engine.evaluate("hold", &params, range()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.memo_len(), 1);
        assert!((first.metrics.cumulative_return - 1.0).abs() < 1e-9);
        assert_eq!(first.dataset_versions.get("prices"), Some(&1));
        assert!(!first.stale);
        assert_eq!(first.params.get("noise"), Some(&ParamValue::Bool(false)));
    }

    #[tokio::test]
    async fn test_new_dataset_version_invalidates_memo() {
        let (engine, store) = setup(EngineConfig::default()).await;
        let params = Params::new().with("symbol", "A");

        let before = engine.evaluate("hold", &params, range()).await.unwrap();
        store.put("prices", &prices(2.0), None).await.unwrap();
        let after = engine.evaluate("hold", &params, range()).await.unwrap();

        assert_eq!(engine.memo_len(), 1);
        assert_eq!(after.dataset_versions.get("prices"), Some(&2));
        assert_eq!(before.metrics, after.metrics);
    }

    #[tokio::test]
    async fn test_memo_does_not_grow_across_versions() {
        let (engine, store) = setup(EngineConfig::default()).await;
        let grid = ParamGrid::new().with("symbol", ["A", "B", "C"]);

        engine.optimize("hold", &grid, range()).await.unwrap();
        assert_eq!(engine.memo_len(), 3);

        for scale in [2.0, 3.0, 4.0] {
            store.put("prices", &prices(scale), None).await.unwrap();
            engine
                .evaluate("hold", &Params::new().with("symbol", "A"), range())
                .await
                .unwrap();
            assert_eq!(engine.memo_len(), 1);
        }

        engine.optimize("hold", &grid, range()).await.unwrap();
        assert_eq!(engine.memo_len(), 3);
    }

    /// Monthly closes over 2023 and 2024: A rises through 2023 and falls
    /// through 2024, B does the opposite.
    fn two_years() -> Dataset {
        let mut records = Vec::new();
        for m in 0..24u32 {
            let date = NaiveDate::from_ymd_opt(2023 + (m / 12) as i32, m % 12 + 1, 1).unwrap();
            let up = m.min(11) as i32;
            let down = m.saturating_sub(11) as i32;
            let a = 100.0 * 1.05f64.powi(up) * 0.95f64.powi(down);
            let b = 100.0 * 0.95f64.powi(up) * 1.05f64.powi(down);
            records.push(Record::new("A", date, vec![Value::Float(a)]));
            records.push(Record::new("B", date, vec![Value::Float(b)]));
        }
        Dataset::from_records("prices", Schema::of(&[("close", ColumnType::Float)]), records).unwrap()
    }

    #[tokio::test]
    async fn test_walk_forward_picks_in_sample_winner() {
        let (engine, store) = setup(EngineConfig::default().with_objective(Objective::CumulativeReturn)).await;
        store.put("prices", &two_years(), None).await.unwrap();
        let grid = ParamGrid::new().with("symbol", ["A", "B"]);
        let ymd = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let range = DateRange::new(ymd(2023, 1, 1), ymd(2024, 12, 31)).unwrap();

        let report = engine.walk_forward("hold", &grid, range, 6, 3).await.unwrap();
        assert_eq!(report.windows.len(), 6);
        assert_eq!(report.windows[0].train, DateRange::new(ymd(2023, 1, 1), ymd(2023, 6, 30)).unwrap());
        assert_eq!(report.windows[0].test, DateRange::new(ymd(2023, 7, 1), ymd(2023, 9, 30)).unwrap());

        let winners: Vec<String> = report
            .windows
            .iter()
            .map(|w| w.in_sample.params.get("symbol").unwrap().to_string())
            .collect();
        assert_eq!(winners, vec!["A", "A", "A", "B", "B", "B"]);
        for w in &report.windows {
            assert_eq!(w.in_sample.params, w.out_of_sample.params);
            assert_eq!(w.out_of_sample.range, w.test);
        }

        // A's 2023 run reverses at the turn of the year.
        assert!(report.windows[1].out_of_sample.metrics.cumulative_return > 0.0);
        assert!(report.windows[2].out_of_sample.metrics.cumulative_return < 0.0);
        assert!(report.windows[5].out_of_sample.metrics.cumulative_return > 0.0);
        assert!(report.avg_in_sample() > report.avg_out_of_sample());
        assert!(report.efficiency().is_finite());
        assert!(!report.stale());

        let short = DateRange::new(ymd(2023, 1, 1), ymd(2023, 6, 30)).unwrap();
        let err = engine.walk_forward("hold", &grid, short, 6, 3).await;
        assert!(matches!(err, Err(DeskError::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_stale_inputs_flag_result() {
        let (engine, store) = setup(EngineConfig::default()).await;
        let old = prices(1.0).with_last_updated(Utc::now() - chrono::Duration::days(9));
        store.put("prices", &old, None).await.unwrap();

        let result = engine
            .evaluate("hold", &Params::new(), range())
            .await
            .unwrap();
        assert!(result.stale);

        let lenient = EngineConfig::default().with_max_age("prices", Duration::from_secs(30 * 86_400));
        let (engine, store) = setup(lenient).await;
        store.put("prices", &old, None).await.unwrap();
        assert!(!engine.evaluate("hold", &Params::new(), range()).await.unwrap().stale);
    }

    #[tokio::test]
    async fn test_optimize_orders_by_objective() {
        let (engine, _) = setup(EngineConfig::default()).await;
        let grid = ParamGrid::new()
            .with("symbol", ["C", "A", "B"])
            .with("noise", [false, true]);

        let results = engine.optimize("hold", &grid, range()).await.unwrap();
        assert_eq!(results.len(), 6);

        let held: Vec<(String, bool)> = results
            .iter()
            .map(|r| {
                (
                    r.params.get("symbol").unwrap().to_string(),
                    r.params.flag("noise", true),
                )
            })
            .collect();
        // Equal results keep grid order: noise=false before noise=true.
        assert_eq!(
            held,
            vec![
                ("A".to_string(), false),
                ("A".to_string(), true),
                ("B".to_string(), false),
                ("B".to_string(), true),
                ("C".to_string(), false),
                ("C".to_string(), true),
            ]
        );
        for pair in results.windows(2) {
            assert!(pair[0].metrics.cumulative_return >= pair[1].metrics.cumulative_return);
        }

        // A second sweep is served from the memo and ranks identically.
        let again = engine.optimize("hold", &grid, range()).await.unwrap();
        assert_eq!(results, again);
        assert_eq!(engine.memo_len(), 6);
    }

    #[test]
    fn test_rank_breaks_ties_by_volatility_then_grid_order() {
        let result = |cumulative_return: f64, volatility: f64| BacktestResult {
            strategy: "hold".into(),
            params: Params::new(),
            range: range(),
            rebalance: Rebalance::Monthly,
            periods: Vec::new(),
            metrics: Metrics {
                cumulative_return,
                volatility,
                ..Metrics::default()
            },
            dataset_versions: BTreeMap::new(),
            stale: false,
        };
        let mut results = vec![
            (0, result(0.1, 0.3)),
            (1, result(0.2, 0.5)),
            (2, result(0.1, 0.1)),
            (3, result(0.1, 0.1)),
        ];
        rank(&mut results, Objective::CumulativeReturn);
        let order: Vec<usize> = results.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[tokio::test]
    async fn test_errors() {
        let (engine, store) = setup(EngineConfig::default()).await;

        let unknown = engine.evaluate("nope", &Params::new(), range()).await;
        assert!(matches!(unknown, Err(DeskError::UnknownStrategy(_))));

        let invalid = engine
            .evaluate("hold", &Params::new().with("symbol", "Q"), range())
            .await;
        assert!(matches!(invalid, Err(DeskError::InvalidParameter(_))));

        let failing = engine
            .evaluate("hold", &Params::new().with("symbol", "Z"), range())
            .await;
        match failing {
            Err(DeskError::StrategyEvaluationFailure { strategy, date, .. }) => {
                assert_eq!(strategy, "hold");
                assert_eq!(date, d(1, 2));
            }
            other => panic!("unexpected {other:?}"),
        }

        let grid = ParamGrid::new().with("symbol", ["A", "Z"]);
        assert!(engine.optimize("hold", &grid, range()).await.is_err());

        store.remove("prices").await.unwrap();
        let missing = engine.evaluate("hold", &Params::new(), range()).await;
        assert!(matches!(missing, Err(DeskError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_select_uses_latest_date() {
        let (engine, _) = setup(EngineConfig::default()).await;
        let loaded = engine
            .select("hold", &Params::new().with("symbol", "B"), None)
            .await
            .unwrap();
        assert_eq!(loaded.value.date, d(3, 29));
        assert_eq!(loaded.value.picks.len(), 1);
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.origin, LoadOrigin::Cache);

        let earlier = engine
            .select("hold", &Params::new(), Some(d(2, 15)))
            .await
            .unwrap();
        assert_eq!(earlier.value.date, d(2, 15));
    }
}
