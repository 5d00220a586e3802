use std::collections::{BTreeMap, BTreeSet};
use stockdesk_core::{Rebalance, Result, Symbol};

use super::{GrowthStrategy, MomentumStrategy, ValueStrategy};
use crate::{
    params::{ParamSpec, Params},
    selection::Pick,
    snapshot::Snapshot,
    strategy::Strategy,
};

/// Weighted blend of the value, growth and momentum screens.
///
/// Each enabled factor runs its strategy with default parameters. A security
/// scores the weighted sum of its factor scores, counting 0 for factors that
/// did not pick it. Weights are normalized over the factors that picked
/// anything at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeStrategy;

impl CompositeStrategy {
    fn factors() -> [(&'static str, &'static str, &'static dyn Strategy); 3] {
        [
            ("use_value", "value_weight", &ValueStrategy),
            ("use_growth", "growth_weight", &GrowthStrategy),
            ("use_momentum", "momentum_weight", &MomentumStrategy),
        ]
    }
}

impl Strategy for CompositeStrategy {
    fn name(&self) -> &str {
        "composite"
    }

    fn description(&self) -> &str {
        "Weighted blend of the value, growth and momentum scores"
    }

    fn datasets(&self) -> Vec<String> {
        let names: BTreeSet<String> = Self::factors()
            .iter()
            .flat_map(|(_, _, strategy)| strategy.datasets())
            .collect();
        names.into_iter().collect()
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::float("value_weight", 0.0, 1.0, 0.4, "Weight of the value score"),
            ParamSpec::float("growth_weight", 0.0, 1.0, 0.3, "Weight of the growth score"),
            ParamSpec::float("momentum_weight", 0.0, 1.0, 0.3, "Weight of the momentum score"),
            ParamSpec::float("min_score", 0.0, 100.0, 50.0, "Blended score floor"),
            ParamSpec::flag("use_value", true, "Blend in the value score"),
            ParamSpec::flag("use_growth", true, "Blend in the growth score"),
            ParamSpec::flag("use_momentum", true, "Blend in the momentum score"),
            ParamSpec::top_n(20),
            ParamSpec::rebalance(Rebalance::Monthly),
        ]
    }

    fn select(&self, snapshot: &Snapshot<'_>, params: &Params) -> Result<Vec<Pick>> {
        let mut parts = Vec::new();
        for (flag, weight, strategy) in Self::factors() {
            if !params.flag(flag, true) {
                continue;
            }
            let defaults = Params::resolve(&strategy.params(), &Params::new())?;
            let picks = strategy.select(snapshot, &defaults)?;
            if !picks.is_empty() {
                parts.push((params.float(weight)?, picks));
            }
        }
        Ok(blend(&parts, params.float("min_score")?))
    }
}

/// Weighted sum of factor scores, keeping blends of at least `min_score`.
fn blend(parts: &[(f64, Vec<Pick>)], min_score: f64) -> Vec<Pick> {
    let total: f64 = parts.iter().map(|(w, _)| w).sum();
    let mut scores: BTreeMap<Symbol, f64> = BTreeMap::new();
    for (weight, picks) in parts {
        let weight = if total > 0.0 { weight / total } else { *weight };
        for pick in picks {
            *scores.entry(pick.symbol.clone()).or_default() += pick.score * weight;
        }
    }
    scores
        .into_iter()
        .filter(|(_, score)| *score >= min_score)
        .map(|(symbol, score)| Pick::new(symbol, score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Selection;
    use chrono::NaiveDate;
    use stockdesk_core::{ColumnType, Dataset, Record, Schema, Value};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    /// CHEAP scores about 56.7 on value, FAIR about 28.3.
    fn datasets() -> BTreeMap<String, Dataset> {
        let valuation = Dataset::from_records(
            "valuation",
            Schema::of(&[
                ("pe_ratio", ColumnType::Float),
                ("pb_ratio", ColumnType::Float),
                ("dividend_yield", ColumnType::Float),
            ]),
            vec![
                Record::new("CHEAP", day(2), vec![8.0.into(), 0.9.into(), 6.0.into()]),
                Record::new("FAIR", day(2), vec![12.0.into(), 1.2.into(), 4.5.into()]),
                Record::new("PRICEY", day(2), vec![30.0.into(), 3.0.into(), 1.0.into()]),
                Record::new("LOSS", day(2), vec![(-5.0).into(), 0.8.into(), 5.0.into()]),
                Record::new("GONE", day(2), vec![5.0.into(), 0.5.into(), 9.0.into()]),
            ],
        )
        .unwrap();
        let prices = ["CHEAP", "FAIR", "PRICEY", "LOSS"]
            .into_iter()
            .map(|s| Record::new(s, day(10), vec![Value::Float(10.0)]))
            .collect();
        let prices =
            Dataset::from_records("prices", Schema::of(&[("close", ColumnType::Float)]), prices).unwrap();
        BTreeMap::from([("valuation".to_string(), valuation), ("prices".to_string(), prices)])
    }

    fn select(params: Params) -> Vec<Pick> {
        let strategy = CompositeStrategy;
        let params = Params::resolve(&strategy.params(), &params).unwrap();
        let data = datasets();
        let picks = strategy.select(&Snapshot::new(day(10), &data), &params).unwrap();
        Selection::ranked(day(10), picks, params.top_n().unwrap()).picks
    }

    fn value_only() -> Params {
        Params::new().with("use_growth", false).with("use_momentum", false)
    }

    #[test]
    fn test_composite_applies_min_score() {
        let picks = select(value_only());
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].symbol, Symbol::new("CHEAP"));
        // A lone factor carries the whole weight.
        assert!((picks[0].score - 170.0 / 3.0).abs() < 1e-9);

        let symbols: Vec<String> = select(value_only().with("min_score", 0.0))
            .iter()
            .map(|p| p.symbol.as_str().to_string())
            .collect();
        assert_eq!(symbols, vec!["CHEAP", "FAIR"]);
    }

    #[test]
    fn test_composite_without_factors_picks_nothing() {
        let params = value_only().with("use_value", false);
        assert!(select(params).is_empty());
    }

    #[test]
    fn test_blend_weights_and_missing_factors() {
        let value = vec![Pick::new("A", 80.0), Pick::new("B", 60.0)];
        let momentum = vec![Pick::new("A", 40.0), Pick::new("C", 100.0)];
        let picks = blend(&[(0.6, value), (0.2, momentum)], 0.0);

        let scores: BTreeMap<String, f64> = picks
            .iter()
            .map(|p| (p.symbol.as_str().to_string(), p.score))
            .collect();
        assert!((scores["A"] - 70.0).abs() < 1e-9);
        assert!((scores["B"] - 45.0).abs() < 1e-9);
        assert!((scores["C"] - 25.0).abs() < 1e-9);

        let zero = blend(&[(0.0, vec![Pick::new("A", 80.0)])], 0.0);
        assert_eq!(zero, vec![Pick::new("A", 0.0)]);
        assert!(blend(&[], 0.0).is_empty());
    }

    #[test]
    fn test_composite_reads_every_factor_dataset() {
        assert_eq!(CompositeStrategy.datasets(), vec!["prices", "revenue", "valuation"]);
    }
}
