use std::collections::BTreeMap;
use stockdesk_core::{Rebalance, Result, Symbol};

use super::{mean_scores, pct_rank};
use crate::{
    params::{ParamSpec, Params},
    selection::Pick,
    snapshot::Snapshot,
    strategy::Strategy,
};

const REVENUE: &str = "revenue";
const MAX_STREAK: usize = 12;

/// Sustained monthly revenue growth.
///
/// Reads `revenue_yoy` and `revenue_mom` (percent) from the `revenue` dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrowthStrategy;

impl Strategy for GrowthStrategy {
    fn name(&self) -> &str {
        "growth"
    }

    fn description(&self) -> &str {
        "Revenue growing year over year for consecutive months"
    }

    fn datasets(&self) -> Vec<String> {
        vec![REVENUE.to_string()]
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::float("revenue_yoy_min", -50.0, 200.0, 20.0, "Revenue YoY floor (%)"),
            ParamSpec::float("revenue_mom_min", -50.0, 100.0, 10.0, "Revenue MoM floor (%)"),
            ParamSpec::int("consecutive_months", 1, 12, 3, "Months of positive YoY required"),
            ParamSpec::flag("use_yoy", true, "Apply the YoY floor"),
            ParamSpec::flag("use_mom", true, "Apply the MoM floor"),
            ParamSpec::flag("use_consecutive", true, "Require consecutive YoY growth"),
            ParamSpec::top_n(10),
            ParamSpec::rebalance(Rebalance::Monthly),
        ]
    }

    fn select(&self, snapshot: &Snapshot<'_>, params: &Params) -> Result<Vec<Pick>> {
        let yoy = snapshot.latest(REVENUE, "revenue_yoy")?;
        let mom = snapshot.latest(REVENUE, "revenue_mom")?;
        let universe: Vec<Symbol> = yoy.keys().chain(mom.keys()).cloned().collect();

        let mut passed: BTreeMap<Symbol, bool> = universe.into_iter().map(|s| (s, true)).collect();
        let mut components = Vec::new();
        let mut enabled = false;

        if params.flag("use_yoy", true) {
            enabled = true;
            let min = params.float("revenue_yoy_min")?;
            for (symbol, ok) in &mut passed {
                *ok &= yoy.get(symbol).is_some_and(|v| *v >= min);
            }
            components.push(pct_rank(&yoy));
        }
        if params.flag("use_mom", true) {
            enabled = true;
            let min = params.float("revenue_mom_min")?;
            for (symbol, ok) in &mut passed {
                *ok &= mom.get(symbol).is_some_and(|v| *v >= min);
            }
            components.push(pct_rank(&mom));
        }
        if params.flag("use_consecutive", true) {
            enabled = true;
            let months = usize::try_from(params.int("consecutive_months")?).unwrap_or(1);
            let histories = snapshot.histories(REVENUE, "revenue_yoy")?;
            let mut streaks = BTreeMap::new();
            for (symbol, ok) in &mut passed {
                let streak = histories.get(symbol).map_or(0, |h| growth_streak(h));
                *ok &= streak >= months;
                streaks.insert(symbol.clone(), streak.min(MAX_STREAK) as f64 / MAX_STREAK as f64 * 100.0);
            }
            components.push(streaks);
        }

        if !enabled {
            return Ok(Vec::new());
        }
        let survivors = passed.iter().filter(|(_, ok)| **ok).map(|(s, _)| s);
        Ok(mean_scores(survivors, &components))
    }
}

/// Number of trailing periods with positive growth.
fn growth_streak(history: &[f64]) -> usize {
    history.iter().rev().take_while(|v| **v > 0.0).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Selection;
    use chrono::NaiveDate;
    use stockdesk_core::{ColumnType, Dataset, Record, Schema};

    fn month(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, 10).unwrap()
    }

    fn datasets() -> BTreeMap<String, Dataset> {
        // (symbol, yoy history, latest mom)
        let rows: [(&str, [f64; 4], f64); 4] = [
            ("STEADY", [5.0, 12.0, 25.0, 30.0], 12.0),
            ("SURGE", [-8.0, -2.0, 40.0, 80.0], 25.0),
            ("RISING", [10.0, 15.0, 22.0, 45.0], 15.0),
            ("SLOW", [3.0, 4.0, 5.0, 6.0], 1.0),
        ];
        let mut records = Vec::new();
        for (symbol, yoy, mom) in rows {
            for (i, v) in yoy.iter().enumerate() {
                let m = month(i as u32 + 1);
                let mom = if i == 3 { mom } else { 0.0 };
                records.push(Record::new(symbol, m, vec![(*v).into(), mom.into()]));
            }
        }
        let revenue = Dataset::from_records(
            REVENUE,
            Schema::of(&[("revenue_yoy", ColumnType::Float), ("revenue_mom", ColumnType::Float)]),
            records,
        )
        .unwrap();
        BTreeMap::from([(REVENUE.to_string(), revenue)])
    }

    fn select(params: Params) -> Vec<String> {
        let strategy = GrowthStrategy;
        let params = Params::resolve(&strategy.params(), &params).unwrap();
        let data = datasets();
        let picks = strategy.select(&Snapshot::new(month(4), &data), &params).unwrap();
        Selection::ranked(month(4), picks, params.top_n().unwrap())
            .symbols()
            .map(|s| s.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_growth_requires_streak() {
        // SURGE has only two positive months, SLOW misses both floors.
        assert_eq!(select(Params::new()), vec!["RISING", "STEADY"]);
    }

    #[test]
    fn test_growth_short_streak_admits_surge() {
        let params = Params::new().with("consecutive_months", 2i64);
        assert_eq!(select(params), vec!["SURGE", "RISING", "STEADY"]);
    }

    #[test]
    fn test_growth_streak() {
        assert_eq!(growth_streak(&[1.0, -1.0, 2.0, 3.0]), 2);
        assert_eq!(growth_streak(&[]), 0);
        assert_eq!(growth_streak(&[1.0, 0.0]), 0);
    }
}
