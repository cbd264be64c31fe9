//! Open-candle state machine.
//!
//! Per (instrument, resolution) the book is either empty or holds one open
//! candle. A sample in the open candle's period folds into it, a sample in a
//! later period closes it and opens the next one, and a sample from an
//! earlier period is stale.
//!
//! Providers serve the newest row of a window while it is still forming and
//! send it again, updated, on the next poll. [`CandleBook::revise`] swaps
//! the last folded sample for its newer revision.

use std::collections::HashMap;

use chrono::{DateTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::Serialize;

use barsync_market_data::Resolution;

use crate::bars::PriceBar;
use crate::normalize::Sample;

/// An in-progress bar. Lives only in memory until flushed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenCandle {
    pub period_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub last_update: DateTime<Utc>,
    #[serde(skip)]
    last_sample: LastSample,
}

/// The most recent sample folded in, and the candle as it was before it.
/// `before` is `None` when that sample opened the candle.
#[derive(Clone, Debug, PartialEq, Eq)]
struct LastSample {
    at: DateTime<Utc>,
    before: Option<Folded>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Folded {
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
}

impl OpenCandle {
    fn seed(sample: &Sample, period_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            period_start,
            open: sample.open,
            high: sample.high,
            low: sample.low,
            close: sample.close,
            volume: sample.volume,
            last_update: now,
            last_sample: LastSample {
                at: sample.timestamp,
                before: None,
            },
        }
    }

    fn fold(&mut self, sample: &Sample, now: DateTime<Utc>) {
        self.last_sample = LastSample {
            at: sample.timestamp,
            before: Some(Folded {
                high: self.high,
                low: self.low,
                close: self.close,
                volume: self.volume,
            }),
        };
        self.high = self.high.max(sample.high);
        self.low = self.low.min(sample.low);
        self.close = sample.close;
        self.volume = self.volume.saturating_add(sample.volume);
        self.last_update = now;
    }

    /// Replaces the last folded sample with `sample`. Returns false when
    /// `sample` is not a revision of it.
    fn revise(&mut self, sample: &Sample, now: DateTime<Utc>) -> bool {
        if sample.timestamp != self.last_sample.at {
            return false;
        }
        match self.last_sample.before.take() {
            None => *self = Self::seed(sample, self.period_start, now),
            Some(before) => {
                self.high = before.high;
                self.low = before.low;
                self.close = before.close;
                self.volume = before.volume;
                self.fold(sample, now);
            }
        }
        true
    }

    pub fn to_bar(&self, instrument: &str, resolution: Resolution) -> PriceBar {
        PriceBar {
            instrument: instrument.to_string(),
            resolution,
            period_start: self.period_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// What applying one sample did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FoldOutcome {
    /// No candle was open; one was opened.
    Opened,
    /// Folded into the open candle.
    Folded,
    /// The open candle closed and a new one opened with this sample.
    Rolled { flushed: PriceBar },
    /// Replaced the last sample folded into the open candle.
    Revised,
    /// Sample belongs to a period before the open candle; ignored.
    Stale,
}

#[derive(Debug)]
pub struct CandleBook {
    candles: HashMap<(String, Resolution), OpenCandle>,
    week_end: Weekday,
}

impl CandleBook {
    pub fn new(week_end: Weekday) -> Self {
        Self {
            candles: HashMap::new(),
            week_end,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, instrument: &str, resolution: Resolution) -> Option<&OpenCandle> {
        self.candles.get(&(instrument.to_string(), resolution))
    }

    pub fn apply(&mut self, sample: &Sample, now: DateTime<Utc>) -> FoldOutcome {
        let boundary = sample
            .resolution
            .floor_anchored(sample.timestamp, self.week_end);
        let key = (sample.instrument.clone(), sample.resolution);

        match self.candles.get_mut(&key) {
            None => {
                self.candles
                    .insert(key, OpenCandle::seed(sample, boundary, now));
                FoldOutcome::Opened
            }
            Some(candle) if boundary == candle.period_start => {
                candle.fold(sample, now);
                FoldOutcome::Folded
            }
            Some(candle) if boundary > candle.period_start => {
                let flushed = candle.to_bar(&sample.instrument, sample.resolution);
                *candle = OpenCandle::seed(sample, boundary, now);
                FoldOutcome::Rolled { flushed }
            }
            Some(_) => FoldOutcome::Stale,
        }
    }

    /// Applies `sample` as a newer revision of the sample last folded at the
    /// same timestamp. Without a matching sample in the open candle it is
    /// applied like any other sample.
    pub fn revise(&mut self, sample: &Sample, now: DateTime<Utc>) -> FoldOutcome {
        let boundary = sample
            .resolution
            .floor_anchored(sample.timestamp, self.week_end);
        let key = (sample.instrument.clone(), sample.resolution);
        if let Some(candle) = self.candles.get_mut(&key) {
            if candle.period_start == boundary && candle.revise(sample, now) {
                return FoldOutcome::Revised;
            }
        }
        self.apply(sample, now)
    }

    /// Closes every open candle.
    pub fn drain(&mut self) -> Vec<PriceBar> {
        let mut bars: Vec<PriceBar> = self
            .candles
            .drain()
            .map(|((instrument, resolution), candle)| candle.to_bar(&instrument, resolution))
            .collect();
        bars.sort_by(|a, b| a.key().cmp(&b.key()));
        bars
    }

    /// Open candles as bars, without closing them.
    pub fn snapshot(&self) -> Vec<PriceBar> {
        let mut bars: Vec<PriceBar> = self
            .candles
            .iter()
            .map(|((instrument, resolution), candle)| candle.to_bar(instrument, *resolution))
            .collect();
        bars.sort_by(|a, b| a.key().cmp(&b.key()));
        bars
    }
}
