use std::collections::HashMap;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use barsync_market_data::Resolution;

/// Tradable instrument reference data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub symbol: String,
    pub exchange: Option<String>,
    pub name: Option<String>,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: None,
            name: None,
        }
    }
}

/// Unique identity of a stored bar.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarKey {
    pub instrument: String,
    pub resolution: Resolution,
    pub period_start: DateTime<Utc>,
}

/// One OHLCV bar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBar {
    pub instrument: String,
    pub resolution: Resolution,
    pub period_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Ways a bar can break the OHLC invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BarViolation {
    #[error("negative price")]
    NegativePrice,
    #[error("high {high} below open/close/low")]
    HighTooLow { high: Decimal },
    #[error("low {low} above open/close/high")]
    LowTooHigh { low: Decimal },
}

impl PriceBar {
    pub fn key(&self) -> BarKey {
        BarKey {
            instrument: self.instrument.clone(),
            resolution: self.resolution,
            period_start: self.period_start,
        }
    }

    /// Checks `high >= max(open, close, low)`, `low <= min(open, close, high)`
    /// and that no price is negative.
    pub fn validate(&self) -> Result<(), BarViolation> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| p.is_sign_negative() && !p.is_zero()) {
            return Err(BarViolation::NegativePrice);
        }
        if self.high < self.open.max(self.close).max(self.low) {
            return Err(BarViolation::HighTooLow { high: self.high });
        }
        if self.low > self.open.min(self.close).min(self.high) {
            return Err(BarViolation::LowTooHigh { low: self.low });
        }
        Ok(())
    }
}

/// Rows written by an upsert, split by whether the key already existed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

impl AddAssign for UpsertSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Groups bars by (instrument, resolution), preserving input order within
/// each group.
pub fn group_by_series(bars: &[PriceBar]) -> HashMap<(String, Resolution), Vec<&PriceBar>> {
    let mut groups: HashMap<(String, Resolution), Vec<&PriceBar>> = HashMap::new();
    for bar in bars {
        groups
            .entry((bar.instrument.clone(), bar.resolution))
            .or_default()
            .push(bar);
    }
    groups
}
