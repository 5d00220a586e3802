//! Built-in screening strategies.
//!
//! Each strategy filters its universe with threshold conditions that can be
//! switched off one by one, then scores the survivors by the mean of
//! percentile ranks (0-100) of its indicators across the whole universe.
//! [`CompositeStrategy`] blends the scores of the other three.

mod composite;
mod growth;
mod momentum;
mod value;

pub use composite::CompositeStrategy;
pub use growth::GrowthStrategy;
pub use momentum::MomentumStrategy;
pub use value::ValueStrategy;

use std::collections::BTreeMap;
use std::sync::Arc;
use stockdesk_core::Symbol;

use crate::{selection::Pick, strategy::Strategy};

/// Securities without a price row this many days before the decision date
/// are treated as delisted or suspended.
pub(crate) const ACTIVE_WITHIN_DAYS: i64 = 30;

/// Every built-in strategy.
pub(crate) fn all() -> Vec<Arc<dyn Strategy>> {
    vec![
        Arc::new(ValueStrategy),
        Arc::new(GrowthStrategy),
        Arc::new(MomentumStrategy),
        Arc::new(CompositeStrategy),
    ]
}

/// Percentile rank in `(0, 100]`, ties sharing their average rank.
pub(crate) fn pct_rank(values: &BTreeMap<Symbol, f64>) -> BTreeMap<Symbol, f64> {
    let mut sorted: Vec<(&Symbol, f64)> = values
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(s, v)| (s, *v))
        .collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let n = sorted.len() as f64;
    let mut out = BTreeMap::new();
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].1 == sorted[i].1 {
            j += 1;
        }
        // 1-based positions i+1..=j+1 share their mean.
        let rank = (i + j + 2) as f64 / 2.0;
        for (symbol, _) in &sorted[i..=j] {
            out.insert((*symbol).clone(), rank / n * 100.0);
        }
        i = j + 1;
    }
    out
}

/// Scores `passed` by the mean of whichever `components` rate each security.
pub(crate) fn mean_scores<'a>(
    passed: impl IntoIterator<Item = &'a Symbol>,
    components: &[BTreeMap<Symbol, f64>],
) -> Vec<Pick> {
    passed
        .into_iter()
        .filter_map(|symbol| {
            let scores: Vec<f64> = components.iter().filter_map(|c| c.get(symbol).copied()).collect();
            if scores.is_empty() {
                None
            } else {
                let score = scores.iter().sum::<f64>() / scores.len() as f64;
                Some(Pick::new(symbol.clone(), score))
            }
        })
        .collect()
}
