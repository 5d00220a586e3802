//! Pure backtest evaluation over an already loaded set of datasets.
//!
//! [`run_backtest`] never touches the cache; the engine loads inputs once and
//! may call it many times (in parallel during a parameter sweep).

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use stockdesk_core::{Dataset, DeskError, Rebalance, Result, Symbol};
use tracing::trace;

use crate::{
    metrics::Metrics,
    params::Params,
    selection::Selection,
    snapshot::Snapshot,
    strategy::Strategy,
};

/// Inclusive date range of a backtest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    /// First date.
    pub start: NaiveDate,
    /// Last date.
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(DeskError::InvalidParameter(format!(
                "date range starts {start} after it ends {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// True if `date` lies within the range.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Rolling `(train, test)` splits for walk-forward analysis.
    ///
    /// Each split is `train_months` immediately followed by `test_months`.
    /// Splits advance by `test_months`, so the test windows tile the range
    /// after the first training window. A split whose test window would end
    /// after `self.end` is not produced.
    #[must_use]
    pub fn walk_forward(&self, train_months: u32, test_months: u32) -> Vec<(Self, Self)> {
        if train_months == 0 || test_months == 0 {
            return Vec::new();
        }
        let split = |offset: u32| -> Option<(Self, Self)> {
            let train_start = self.start.checked_add_months(Months::new(offset))?;
            let test_start = train_start.checked_add_months(Months::new(train_months))?;
            let test_end = test_start
                .checked_add_months(Months::new(test_months))?
                .pred_opt()?;
            if test_end > self.end {
                return None;
            }
            let train = Self {
                start: train_start,
                end: test_start.pred_opt()?,
            };
            let test = Self {
                start: test_start,
                end: test_end,
            };
            Some((train, test))
        };

        let mut splits = Vec::new();
        let mut k = 0u32;
        while let Some(window) = k.checked_mul(test_months).and_then(&split) {
            splits.push(window);
            k += 1;
        }
        splits
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.start, self.end)
    }
}

/// Brokerage costs charged at each rebalance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingCosts {
    /// Commission rate on traded value.
    pub commission_rate: f64,
    /// Broker discount applied to the commission.
    pub commission_discount: f64,
    /// Transaction tax on sells.
    pub tax_rate: f64,
    /// Minimum commission per trade, in currency units.
    pub min_commission: f64,
    /// Starting capital, used to apply the minimum commission.
    pub initial_capital: f64,
}

impl Default for TradingCosts {
    fn default() -> Self {
        Self {
            commission_rate: 0.001_425,
            commission_discount: 0.6,
            tax_rate: 0.003,
            min_commission: 20.0,
            initial_capital: 1_000_000.0,
        }
    }
}

impl TradingCosts {
    /// No costs at all.
    #[must_use]
    pub fn free() -> Self {
        Self {
            commission_rate: 0.0,
            commission_discount: 1.0,
            tax_rate: 0.0,
            min_commission: 0.0,
            initial_capital: 1_000_000.0,
        }
    }

    /// Cost of one trade of `amount`.
    #[must_use]
    pub fn trade_cost(&self, amount: f64, is_sell: bool) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        let commission = (amount * self.commission_rate * self.commission_discount).max(self.min_commission);
        let tax = if is_sell { amount * self.tax_rate } else { 0.0 };
        commission + tax
    }
}

/// Settings shared by every backtest of an engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    /// Dataset whose dates are the trading calendar and whose prices value holdings.
    pub price_dataset: String,
    /// Column of `price_dataset` holding closing prices.
    pub price_column: String,
    /// Trading costs.
    pub costs: TradingCosts,
    /// Annual risk-free rate used by the Sharpe ratio.
    pub risk_free_rate: f64,
    /// Daily price limit as a fraction of the previous close, e.g. `0.10`.
    ///
    /// When set, buys of a security that closed at limit-up on the rebalance
    /// date and sells of one that closed at limit-down do not fill.
    pub price_limit: Option<f64>,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            price_dataset: "prices".to_string(),
            price_column: "close".to_string(),
            costs: TradingCosts::default(),
            risk_free_rate: 0.02,
            price_limit: None,
        }
    }
}

/// One holding period between two rebalance dates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Period {
    /// Rebalance date the selection was made on.
    pub start: NaiveDate,
    /// Next rebalance date, or the last trading date of the range.
    pub end: NaiveDate,
    /// Holdings for the period.
    pub selection: Selection,
    /// Equal-weighted return before costs.
    pub gross_return: f64,
    /// Costs as a fraction of equity at the rebalance.
    pub cost: f64,
    /// Return after costs.
    pub net_return: f64,
    /// One-way turnover at the rebalance.
    pub turnover: f64,
}

/// Outcome of evaluating a strategy over a date range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Strategy name.
    pub strategy: String,
    /// Resolved parameters, defaults included.
    pub params: Params,
    /// Requested range.
    pub range: DateRange,
    /// Rebalance frequency used.
    pub rebalance: Rebalance,
    /// Holding periods in date order.
    pub periods: Vec<Period>,
    /// Aggregate metrics over `periods`.
    pub metrics: Metrics,
    /// Cache versions of the input datasets.
    pub dataset_versions: BTreeMap<String, u64>,
    /// True if any input dataset was older than its maximum age.
    pub stale: bool,
}

/// Metric a parameter sweep ranks by. Higher is better for every objective.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Compounded return.
    #[default]
    CumulativeReturn,
    /// Annualized return.
    AnnualizedReturn,
    /// Sharpe ratio.
    SharpeRatio,
    /// Maximum drawdown, smaller ranks first.
    MaxDrawdown,
    /// Fraction of winning periods.
    HitRate,
}

impl Objective {
    /// Score of `metrics` under this objective.
    #[must_use]
    pub fn score(&self, metrics: &Metrics) -> f64 {
        match self {
            Self::CumulativeReturn => metrics.cumulative_return,
            Self::AnnualizedReturn => metrics.annualized_return,
            Self::SharpeRatio => metrics.sharpe_ratio,
            Self::MaxDrawdown => -metrics.max_drawdown,
            Self::HitRate => metrics.hit_rate,
        }
    }
}

/// Closing prices per security, ascending by date.
#[derive(Debug)]
struct PriceBook(BTreeMap<Symbol, Vec<(NaiveDate, f64)>>);

impl PriceBook {
    fn new(prices: &Dataset, column: &str) -> Result<Self> {
        let index = prices
            .schema()
            .index_of(column)
            .ok_or_else(|| DeskError::schema(prices.name(), format!("no column {column}")))?;
        let mut book: BTreeMap<Symbol, Vec<(NaiveDate, f64)>> = BTreeMap::new();
        for record in prices.records() {
            if let Some(close) = record.get(index).and_then(|v| v.as_f64()) {
                book.entry(record.symbol.clone())
                    .or_default()
                    .push((record.date, close));
            }
        }
        Ok(Self(book))
    }

    /// Last close on or before `date`.
    fn close_at(&self, symbol: &Symbol, date: NaiveDate) -> Option<f64> {
        let series = self.0.get(symbol)?;
        let end = series.partition_point(|(d, _)| *d <= date);
        end.checked_sub(1).map(|i| series[i].1)
    }

    /// Close-to-close change into `date`, if `symbol` traded on `date`.
    fn change_at(&self, symbol: &Symbol, date: NaiveDate) -> Option<f64> {
        let series = self.0.get(symbol)?;
        let end = series.partition_point(|(d, _)| *d <= date);
        let (traded, close) = *series.get(end.checked_sub(1)?)?;
        if traded != date {
            return None;
        }
        let (_, previous) = *series.get(end.checked_sub(2)?)?;
        (previous > 0.0).then(|| close / previous - 1.0)
    }
}

fn evaluation_failure(strategy: &str, date: NaiveDate, error: DeskError) -> DeskError {
    match error {
        e @ DeskError::StrategyEvaluationFailure { .. } => e,
        e => DeskError::StrategyEvaluationFailure {
            strategy: strategy.to_string(),
            date,
            reason: e.to_string(),
        },
    }
}

/// Runs the strategy at `date` and ranks its picks.
pub fn select_at(
    strategy: &dyn Strategy,
    params: &Params,
    datasets: &BTreeMap<String, Dataset>,
    date: NaiveDate,
) -> Result<Selection> {
    let snapshot = Snapshot::new(date, datasets);
    let picks = strategy
        .select(&snapshot, params)
        .map_err(|e| evaluation_failure(strategy.name(), date, e))?;
    Ok(Selection::ranked(date, picks, params.top_n()?))
}

/// Evaluates `strategy` with resolved `params` over `range`.
///
/// Rebalance dates are the first trading date of each period, trading dates
/// being the dates present in the price dataset. Each selection is held
/// until the next rebalance date; the last one until the last trading date
/// of the range. Selections are equal-weighted and period returns are taken
/// from the last close on or before each boundary. Securities missing either
/// price contribute nothing. With a [`BacktestSettings::price_limit`], orders
/// that would not fill keep their previous weight and any unfilled buying
/// power sits in cash.
///
/// `dataset_versions` and `stale` of the result are left for the caller.
pub fn run_backtest(
    strategy: &dyn Strategy,
    params: &Params,
    datasets: &BTreeMap<String, Dataset>,
    range: DateRange,
    settings: &BacktestSettings,
) -> Result<BacktestResult> {
    let rebalance = params.rebalance()?;
    let prices = datasets
        .get(&settings.price_dataset)
        .ok_or_else(|| DeskError::NotFound(settings.price_dataset.clone()))?;
    let book = PriceBook::new(prices, &settings.price_column)?;

    let trading_dates: Vec<NaiveDate> = prices
        .dates()
        .into_iter()
        .filter(|d| range.contains(*d))
        .collect();
    let rebalance_dates = rebalance.first_dates(&trading_dates);
    let last_trading = trading_dates.last().copied();

    let costs = &settings.costs;
    let mut equity = costs.initial_capital;
    let mut held: BTreeMap<Symbol, f64> = BTreeMap::new();
    let mut periods = Vec::with_capacity(rebalance_dates.len());

    for (i, &start) in rebalance_dates.iter().enumerate() {
        let end = match rebalance_dates.get(i + 1).copied().or(last_trading) {
            Some(end) if end > start => end,
            _ => break,
        };

        let selection = select_at(strategy, params, datasets, start)?;
        trace!(date = %start, picks = selection.len(), "Rebalance");

        let weight = if selection.is_empty() {
            0.0
        } else {
            1.0 / selection.len() as f64
        };
        let target: BTreeMap<Symbol, f64> = selection
            .symbols()
            .map(|s| (s.clone(), weight))
            .collect();
        let target = match settings.price_limit {
            Some(limit) => fill_within_limit(&held, target, &book, start, limit),
            None => target,
        };

        let (cost, turnover) = rebalance_cost(&held, &target, equity, costs);

        let mut total = 0.0;
        let mut contributing = 0.0;
        for (symbol, w) in &target {
            if let (Some(p0), Some(p1)) = (book.close_at(symbol, start), book.close_at(symbol, end)) {
                if p0 > 0.0 {
                    total += w * (p1 / p0 - 1.0);
                    contributing += w;
                }
            }
        }
        let invested: f64 = target.values().sum();
        let gross_return = if contributing > 0.0 {
            total / contributing * invested
        } else {
            0.0
        };
        let net_return = (1.0 - cost) * (1.0 + gross_return) - 1.0;
        equity *= 1.0 + net_return;

        periods.push(Period {
            start,
            end,
            selection,
            gross_return,
            cost,
            net_return,
            turnover,
        });
        held = target;
    }

    let returns: Vec<f64> = periods.iter().map(|p| p.net_return).collect();
    let holdings: Vec<usize> = periods.iter().map(|p| p.selection.len()).collect();
    let turnovers: Vec<f64> = periods.iter().map(|p| p.turnover).collect();
    let metrics = Metrics::compute(
        &returns,
        &holdings,
        &turnovers,
        rebalance.periods_per_year(),
        settings.risk_free_rate,
    );

    Ok(BacktestResult {
        strategy: strategy.name().to_string(),
        params: params.clone(),
        range,
        rebalance,
        periods,
        metrics,
        dataset_versions: BTreeMap::new(),
        stale: false,
    })
}

/// Weights reachable from `held` when aiming at `target` under a price limit.
///
/// Buys into a limit-up close and sells out of a limit-down close keep the
/// held weight. Fillable targets shrink to fit whatever the locked weights
/// leave over.
fn fill_within_limit(
    held: &BTreeMap<Symbol, f64>,
    target: BTreeMap<Symbol, f64>,
    book: &PriceBook,
    date: NaiveDate,
    limit: f64,
) -> BTreeMap<Symbol, f64> {
    let symbols: BTreeSet<&Symbol> = held.keys().chain(target.keys()).collect();
    let mut locked: BTreeMap<Symbol, f64> = BTreeMap::new();
    let mut fillable: BTreeMap<Symbol, f64> = BTreeMap::new();
    for symbol in symbols {
        let before = held.get(symbol).copied().unwrap_or(0.0);
        let after = target.get(symbol).copied().unwrap_or(0.0);
        let blocked = match book.change_at(symbol, date) {
            Some(change) if after > before => change >= limit,
            Some(change) if after < before => change <= -limit,
            _ => false,
        };
        if blocked {
            trace!(symbol = %symbol, date = %date, "Order blocked by price limit");
            if before > 0.0 {
                locked.insert(symbol.clone(), before);
            }
        } else if after > 0.0 {
            fillable.insert(symbol.clone(), after);
        }
    }

    let room = (1.0 - locked.values().sum::<f64>()).max(0.0);
    let wanted: f64 = fillable.values().sum();
    if wanted > room {
        let scale = room / wanted;
        for w in fillable.values_mut() {
            *w *= scale;
        }
        fillable.retain(|_, w| *w > 0.0);
    }
    locked.extend(fillable);
    locked
}

/// Cost fraction and one-way turnover of moving from `held` to `target` weights.
fn rebalance_cost(
    held: &BTreeMap<Symbol, f64>,
    target: &BTreeMap<Symbol, f64>,
    equity: f64,
    costs: &TradingCosts,
) -> (f64, f64) {
    const EPSILON: f64 = 1e-12;

    let symbols: BTreeSet<&Symbol> = held.keys().chain(target.keys()).collect();
    let mut bought = 0.0;
    let mut sold = 0.0;
    let mut spent = 0.0;
    for symbol in symbols {
        let before = held.get(symbol).copied().unwrap_or(0.0);
        let after = target.get(symbol).copied().unwrap_or(0.0);
        let delta = after - before;
        if delta > EPSILON {
            bought += delta;
            spent += costs.trade_cost(equity * delta, false);
        } else if delta < -EPSILON {
            sold += -delta;
            spent += costs.trade_cost(equity * -delta, true);
        }
    }

    let cost = if equity > 0.0 { (spent / equity).min(1.0) } else { 0.0 };
    (cost, bought.max(sold))
}
