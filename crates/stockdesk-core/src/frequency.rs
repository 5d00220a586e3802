//! Rebalance frequency definitions.
//!
//! This module defines [`Rebalance`], the period granularity at which a
//! strategy recomputes its selection, and the rule that picks rebalance dates
//! out of a sequence of trading dates.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How often a strategy's selection is recomputed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rebalance {
    /// Every trading day.
    #[serde(rename = "D")]
    Daily,
    /// First trading day of each ISO week.
    #[serde(rename = "W")]
    Weekly,
    /// First trading day of each month.
    #[default]
    #[serde(rename = "M")]
    Monthly,
    /// First trading day of each calendar quarter.
    #[serde(rename = "Q")]
    Quarterly,
}

impl Rebalance {
    /// All frequencies, shortest first.
    pub const ALL: [Self; 4] = [Self::Daily, Self::Weekly, Self::Monthly, Self::Quarterly];

    /// Single-letter code (`D`, `W`, `M`, `Q`).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Daily => "D",
            Self::Weekly => "W",
            Self::Monthly => "M",
            Self::Quarterly => "Q",
        }
    }

    /// Number of periods in a trading year, used to annualize statistics.
    #[must_use]
    pub const fn periods_per_year(&self) -> f64 {
        match self {
            Self::Daily => 252.0,
            Self::Weekly => 52.0,
            Self::Monthly => 12.0,
            Self::Quarterly => 4.0,
        }
    }

    /// Identifies the period `date` falls in. Dates in the same period share a key.
    #[must_use]
    pub fn period_key(&self, date: NaiveDate) -> (i32, u32) {
        match self {
            Self::Daily => (date.year(), date.ordinal()),
            Self::Weekly => {
                let week = date.iso_week();
                (week.year(), week.week())
            }
            Self::Monthly => (date.year(), date.month()),
            Self::Quarterly => (date.year(), date.month0() / 3),
        }
    }

    /// First trading date of each period among `trading_dates`.
    ///
    /// `trading_dates` must be ascending; the result is ascending too.
    #[must_use]
    pub fn first_dates(&self, trading_dates: &[NaiveDate]) -> Vec<NaiveDate> {
        let mut out: Vec<NaiveDate> = Vec::new();
        let mut last_key = None;
        for &date in trading_dates {
            let key = self.period_key(date);
            if last_key != Some(key) {
                out.push(date);
                last_key = Some(key);
            }
        }
        out
    }
}

impl fmt::Display for Rebalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Rebalance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "D" | "DAILY" => Ok(Self::Daily),
            "W" | "WEEKLY" => Ok(Self::Weekly),
            "M" | "MONTHLY" => Ok(Self::Monthly),
            "Q" | "QUARTERLY" => Ok(Self::Quarterly),
            other => Err(format!("unknown rebalance frequency {other:?}, expected D, W, M or Q")),
        }
    }
}
