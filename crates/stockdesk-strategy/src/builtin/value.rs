use std::collections::BTreeMap;
use stockdesk_core::{Rebalance, Result, Symbol};

use super::{ACTIVE_WITHIN_DAYS, mean_scores, pct_rank};
use crate::{
    params::{ParamSpec, Params},
    selection::Pick,
    snapshot::Snapshot,
    strategy::Strategy,
};

const VALUATION: &str = "valuation";
const PRICES: &str = "prices";

/// Low valuation, high dividend yield.
///
/// Reads `pe_ratio`, `pb_ratio` and `dividend_yield` (percent) from the
/// `valuation` dataset. Non-positive PE and PB never pass and are left out of
/// the ranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueStrategy;

impl Strategy for ValueStrategy {
    fn name(&self) -> &str {
        "value"
    }

    fn description(&self) -> &str {
        "Low PE and PB with a high dividend yield"
    }

    fn datasets(&self) -> Vec<String> {
        vec![VALUATION.to_string(), PRICES.to_string()]
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::float("pe_max", 1.0, 50.0, 15.0, "PE ceiling"),
            ParamSpec::float("pb_max", 0.1, 5.0, 1.5, "PB ceiling"),
            ParamSpec::float("dividend_yield_min", 0.0, 15.0, 4.0, "Dividend yield floor (%)"),
            ParamSpec::flag("use_pe", true, "Apply the PE ceiling"),
            ParamSpec::flag("use_pb", true, "Apply the PB ceiling"),
            ParamSpec::flag("use_dividend", true, "Apply the dividend yield floor"),
            ParamSpec::top_n(10),
            ParamSpec::rebalance(Rebalance::Monthly),
        ]
    }

    fn select(&self, snapshot: &Snapshot<'_>, params: &Params) -> Result<Vec<Pick>> {
        let active = snapshot.active_symbols(PRICES, ACTIVE_WITHIN_DAYS)?;
        let pe = snapshot.latest(VALUATION, "pe_ratio")?;
        let pb = snapshot.latest(VALUATION, "pb_ratio")?;
        let dy = snapshot.latest(VALUATION, "dividend_yield")?;

        let mut conditions: Vec<Box<dyn Fn(&Symbol) -> bool>> = Vec::new();
        let mut components = Vec::new();

        if params.flag("use_pe", true) {
            let max = params.float("pe_max")?;
            components.push(inverse_rank(&pe));
            conditions.push(Box::new(move |s: &Symbol| pe.get(s).is_some_and(|v| *v > 0.0 && *v <= max)));
        }
        if params.flag("use_pb", true) {
            let max = params.float("pb_max")?;
            components.push(inverse_rank(&pb));
            conditions.push(Box::new(move |s: &Symbol| pb.get(s).is_some_and(|v| *v > 0.0 && *v <= max)));
        }
        if params.flag("use_dividend", true) {
            let min = params.float("dividend_yield_min")?;
            let payers = dy
                .iter()
                .filter(|(_, v)| **v >= 0.0)
                .map(|(s, v)| (s.clone(), *v))
                .collect();
            components.push(pct_rank(&payers));
            conditions.push(Box::new(move |s: &Symbol| dy.get(s).is_some_and(|v| *v >= min)));
        }

        if conditions.is_empty() {
            return Ok(Vec::new());
        }
        let passed = active.iter().filter(|s| conditions.iter().all(|c| c(*s)));
        Ok(mean_scores(passed, &components))
    }
}

/// Percentile rank of positive values, reversed so cheaper scores higher.
fn inverse_rank(values: &BTreeMap<Symbol, f64>) -> BTreeMap<Symbol, f64> {
    let positive = values
        .iter()
        .filter(|(_, v)| **v > 0.0)
        .map(|(s, v)| (s.clone(), *v))
        .collect();
    pct_rank(&positive)
        .into_iter()
        .map(|(s, r)| (s, 100.0 - r))
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

    fn datasets() -> BTreeMap<String, Dataset> {
        let valuation = Dataset::from_records(
            VALUATION,
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
                // Published after the decision date.
                Record::new("PRICEY", day(20), vec![5.0.into(), 0.5.into(), 9.0.into()]),
            ],
        )
        .unwrap();
        let mut prices = Vec::new();
        for symbol in ["CHEAP", "FAIR", "PRICEY", "LOSS"] {
            prices.push(Record::new(symbol, day(10), vec![Value::Float(10.0)]));
        }
        let prices =
            Dataset::from_records(PRICES, Schema::of(&[("close", ColumnType::Float)]), prices).unwrap();
        BTreeMap::from([(VALUATION.to_string(), valuation), (PRICES.to_string(), prices)])
    }

    fn select(params: Params) -> Vec<String> {
        let strategy = ValueStrategy;
        let params = Params::resolve(&strategy.params(), &params).unwrap();
        let data = datasets();
        let picks = strategy.select(&Snapshot::new(day(10), &data), &params).unwrap();
        Selection::ranked(day(10), picks, params.top_n().unwrap())
            .symbols()
            .map(|s| s.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_value_filters_and_ranks() {
        // GONE has no recent price, LOSS a negative PE, PRICEY is too expensive.
        assert_eq!(select(Params::new()), vec!["CHEAP", "FAIR"]);
    }

    #[test]
    fn test_value_conditions_can_be_disabled() {
        let params = Params::new()
            .with("use_pe", false)
            .with("use_pb", false)
            .with("dividend_yield_min", 0.0);
        assert_eq!(select(params), vec!["CHEAP", "LOSS", "FAIR", "PRICEY"]);

        let nothing = Params::new()
            .with("use_pe", false)
            .with("use_pb", false)
            .with("use_dividend", false);
        assert!(select(nothing).is_empty());
    }
}
