//! Ranked selections produced by strategies.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use stockdesk_core::Symbol;

/// A security picked by a strategy together with its score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    /// Selected security.
    pub symbol: Symbol,
    /// Strategy score; higher ranks first.
    pub score: f64,
}

impl Pick {
    /// Creates a pick.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, score: f64) -> Self {
        Self {
            symbol: symbol.into(),
            score,
        }
    }
}

/// Ranked picks of one strategy on one date.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Decision date.
    pub date: NaiveDate,
    /// Picks, best first.
    pub picks: Vec<Pick>,
}

impl Selection {
    /// Ranks `picks` by descending score (ties by symbol) and keeps `top_n`.
    ///
    /// Picks with a non-finite score and repeated symbols are dropped.
    #[must_use]
    pub fn ranked(date: NaiveDate, mut picks: Vec<Pick>, top_n: Option<usize>) -> Self {
        picks.retain(|p| p.score.is_finite());
        picks.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));
        let mut seen = std::collections::BTreeSet::new();
        picks.retain(|p| seen.insert(p.symbol.clone()));
        if let Some(n) = top_n {
            picks.truncate(n);
        }
        Self { date, picks }
    }

    /// Selected symbols, best first.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.picks.iter().map(|p| &p.symbol)
    }

    /// Number of picks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.picks.len()
    }

    /// True if nothing was picked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let picks = vec![
            Pick::new("C", 1.0),
            Pick::new("A", 2.0),
            Pick::new("B", 2.0),
            Pick::new("D", f64::NAN),
            Pick::new("A", 0.5),
        ];
        let selection = Selection::ranked(date, picks, Some(2));
        let symbols: Vec<&str> = selection.symbols().map(Symbol::as_str).collect();
        assert_eq!(symbols, vec!["A", "B"]);
    }
}
