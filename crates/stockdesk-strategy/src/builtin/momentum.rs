use std::collections::BTreeMap;
use stockdesk_core::{Rebalance, Result, Symbol};

use super::{ACTIVE_WITHIN_DAYS, mean_scores, pct_rank};
use crate::{
    params::{ParamSpec, Params},
    selection::Pick,
    snapshot::Snapshot,
    strategy::Strategy,
};

const PRICES: &str = "prices";

/// Price breakouts on rising volume with a strong, not overbought, RSI.
///
/// Reads `close` and `volume` from the `prices` dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct MomentumStrategy;

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn description(&self) -> &str {
        "Breakouts above the N-day high confirmed by volume"
    }

    fn datasets(&self) -> Vec<String> {
        vec![PRICES.to_string()]
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("breakout_days", 5, 120, 20, "Breakout lookback in trading days"),
            ParamSpec::float("volume_ratio_min", 0.5, 5.0, 1.5, "Volume ratio floor"),
            ParamSpec::int("volume_ma_days", 1, 60, 5, "Volume average window"),
            ParamSpec::int("rsi_min", 0, 100, 50, "RSI floor"),
            ParamSpec::int("rsi_max", 0, 100, 80, "RSI ceiling"),
            ParamSpec::int("rsi_period", 2, 60, 14, "RSI window"),
            ParamSpec::flag("use_breakout", true, "Require a breakout"),
            ParamSpec::flag("use_volume", true, "Apply the volume ratio floor"),
            ParamSpec::flag("use_rsi", true, "Apply the RSI band"),
            ParamSpec::top_n(10),
            ParamSpec::rebalance(Rebalance::Monthly),
        ]
    }

    fn select(&self, snapshot: &Snapshot<'_>, params: &Params) -> Result<Vec<Pick>> {
        let window = |name: &str| -> Result<usize> {
            Ok(usize::try_from(params.int(name)?).unwrap_or(1).max(1))
        };

        let active = snapshot.active_symbols(PRICES, ACTIVE_WITHIN_DAYS)?;
        let closes = snapshot.histories(PRICES, "close")?;
        let mut passed: BTreeMap<Symbol, bool> = active.into_iter().map(|s| (s, true)).collect();
        let mut components = Vec::new();
        let mut enabled = false;

        if params.flag("use_breakout", true) {
            enabled = true;
            let days = window("breakout_days")?;
            let mut strength = BTreeMap::new();
            for (symbol, ok) in &mut passed {
                let series = closes.get(symbol).map_or(&[][..], Vec::as_slice);
                *ok &= breakout(series, days);
                if let Some(s) = price_strength(series, days) {
                    strength.insert(symbol.clone(), s);
                }
            }
            components.push(pct_rank(&strength));
        }
        if params.flag("use_volume", true) {
            enabled = true;
            let days = window("volume_ma_days")?;
            let min = params.float("volume_ratio_min")?;
            let volumes = snapshot.histories(PRICES, "volume")?;
            let mut ratios = BTreeMap::new();
            for (symbol, ok) in &mut passed {
                let ratio = volumes.get(symbol).and_then(|v| volume_ratio(v, days));
                *ok &= ratio.is_some_and(|r| r >= min);
                if let Some(r) = ratio {
                    ratios.insert(symbol.clone(), r);
                }
            }
            components.push(pct_rank(&ratios));
        }
        if params.flag("use_rsi", true) {
            enabled = true;
            let period = window("rsi_period")?;
            let (lo, hi) = (params.float("rsi_min")?, params.float("rsi_max")?);
            let mut values = BTreeMap::new();
            for (symbol, ok) in &mut passed {
                let value = closes.get(symbol).and_then(|c| rsi(c, period));
                *ok &= value.is_some_and(|v| lo <= v && v <= hi);
                if let Some(v) = value {
                    values.insert(symbol.clone(), v);
                }
            }
            components.push(pct_rank(&values));
        }

        if !enabled {
            return Ok(Vec::new());
        }
        let survivors = passed.iter().filter(|(_, ok)| **ok).map(|(s, _)| s);
        Ok(mean_scores(survivors, &components))
    }
}

/// Latest close above the highest of the `days` closes before it.
fn breakout(closes: &[f64], days: usize) -> bool {
    match closes.split_last() {
        Some((last, before)) if before.len() >= days => {
            let high = before[before.len() - days..]
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            *last > high
        }
        _ => false,
    }
}

/// Latest close relative to the highest of the last `days` closes, itself included.
fn price_strength(closes: &[f64], days: usize) -> Option<f64> {
    let last = *closes.last()?;
    let start = closes.len().saturating_sub(days);
    let high = closes[start..].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (high > 0.0).then(|| last / high)
}

/// Latest volume over the mean of the last `days` volumes, itself included.
fn volume_ratio(volumes: &[f64], days: usize) -> Option<f64> {
    if volumes.len() < days {
        return None;
    }
    let recent = &volumes[volumes.len() - days..];
    let mean = recent.iter().sum::<f64>() / days as f64;
    let last = *recent.last()?;
    (mean > 0.0).then(|| last / mean)
}

/// Relative strength index over simple averages of the last `period` changes.
///
/// Undefined (`None`) when the window holds no losses.
fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() <= period {
        return None;
    }
    let window = &closes[closes.len() - period - 1..];
    let (gain, loss) = window.windows(2).fold((0.0, 0.0), |(g, l), w| {
        let delta = w[1] - w[0];
        if delta > 0.0 { (g + delta, l) } else { (g, l - delta) }
    });
    if loss <= 0.0 {
        return None;
    }
    let rs = (gain / period as f64) / (loss / period as f64);
    Some(100.0 - 100.0 / (1.0 + rs))
}
