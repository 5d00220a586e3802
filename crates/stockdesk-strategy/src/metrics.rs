//! Aggregate performance metrics over a sequence of period returns.

use serde::{Deserialize, Serialize};

/// Performance summary of a backtest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Compounded return over all periods.
    pub cumulative_return: f64,
    /// Cumulative return scaled to one year.
    pub annualized_return: f64,
    /// Annualized standard deviation of period returns.
    pub volatility: f64,
    /// Annualized excess return per unit of volatility.
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough decline of the equity curve, as a positive fraction.
    pub max_drawdown: f64,
    /// Fraction of periods with a positive return.
    pub hit_rate: f64,
    /// Mean number of holdings per period.
    pub average_holdings: f64,
    /// Mean one-way turnover per rebalance.
    pub turnover: f64,
    /// Number of periods.
    pub periods: usize,
}

impl Metrics {
    /// Computes metrics from per-period returns.
    ///
    /// `holdings` and `turnovers` are per-period series aligned with
    /// `returns`; `periods_per_year` annualizes, `risk_free_rate` is annual.
    #[must_use]
    pub fn compute(
        returns: &[f64],
        holdings: &[usize],
        turnovers: &[f64],
        periods_per_year: f64,
        risk_free_rate: f64,
    ) -> Self {
        if returns.is_empty() {
            return Self::default();
        }
        let n = returns.len() as f64;

        let growth = returns.iter().fold(1.0_f64, |acc, r| acc * (1.0 + r));
        let cumulative_return = growth - 1.0;

        let years = n / periods_per_year;
        let annualized_return = if years > 0.0 && growth > 0.0 {
            growth.powf(1.0 / years) - 1.0
        } else if growth <= 0.0 {
            -1.0
        } else {
            0.0
        };

        let (volatility, sharpe_ratio) =
            compute_risk_adjusted(returns, periods_per_year, risk_free_rate);
        let max_drawdown = compute_drawdown(returns);

        let winners = returns.iter().filter(|r| **r > 0.0).count();
        let hit_rate = winners as f64 / n;

        let average_holdings = mean(holdings.iter().map(|h| *h as f64));
        let turnover = mean(turnovers.iter().copied());

        Self {
            cumulative_return,
            annualized_return,
            volatility,
            sharpe_ratio,
            max_drawdown,
            hit_rate,
            average_holdings,
            turnover,
            periods: returns.len(),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn compute_drawdown(returns: &[f64]) -> f64 {
    let mut equity = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut max_dd = 0.0_f64;

    for r in returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

fn compute_risk_adjusted(returns: &[f64], periods_per_year: f64, risk_free_rate: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;
    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let volatility = stddev * periods_per_year.sqrt();
    let excess_return = mean - risk_free_rate / periods_per_year;

    let sharpe = if stddev > 0.0 {
        (excess_return / stddev) * periods_per_year.sqrt()
    } else {
        0.0
    };

    (volatility, sharpe)
}
