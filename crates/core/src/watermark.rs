//! Watermark-based delta detection.
//!
//! The watermark of a series is derived from the stored bars on demand
//! (MIN/MAX of `period_start`); nothing extra is persisted.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc, Weekday};
use log::debug;
use serde::{Deserialize, Serialize};

use barsync_market_data::Resolution;

use crate::bars::BarStore;
use crate::clock::Clock;
use crate::config::BackfillDirection;
use crate::errors::Result;

/// Earliest and latest stored period starts of one series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWatermark {
    pub earliest_known: DateTime<Utc>,
    pub latest_known: DateTime<Utc>,
}

/// Inclusive `[start, end]` window to request from the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

pub struct WatermarkResolver {
    store: Arc<dyn BarStore>,
    clock: Arc<dyn Clock>,
    direction: BackfillDirection,
    overlap_periods: u32,
    week_end: Weekday,
}

impl WatermarkResolver {
    pub fn new(
        store: Arc<dyn BarStore>,
        clock: Arc<dyn Clock>,
        direction: BackfillDirection,
        overlap_periods: u32,
        week_end: Weekday,
    ) -> Self {
        Self {
            store,
            clock,
            direction,
            overlap_periods,
            week_end,
        }
    }

    pub fn watermark(
        &self,
        instrument: &str,
        resolution: Resolution,
    ) -> Result<Option<SyncWatermark>> {
        Ok(self
            .store
            .bounds(instrument, resolution)?
            .map(|(earliest_known, latest_known)| SyncWatermark {
                earliest_known,
                latest_known,
            }))
    }

    /// Computes the range still missing for a series, or `None` when the
    /// series is up to date.
    ///
    /// - no stored data: `[floor(now - horizon), now]`
    /// - `Forward`: from the period after `latest_known`, stepped back by the
    ///   configured overlap
    /// - `Reconcile`: from `earliest_known`
    pub fn resolve(
        &self,
        instrument: &str,
        resolution: Resolution,
        horizon: Duration,
    ) -> Result<Option<FetchRange>> {
        let now = self.clock.now();
        let start = match self.watermark(instrument, resolution)? {
            None => resolution.floor_anchored(now - horizon, self.week_end),
            Some(watermark) => match self.direction {
                BackfillDirection::Forward => {
                    let overlap = i32::try_from(self.overlap_periods).unwrap_or(i32::MAX);
                    resolution.step(watermark.latest_known, 1i32.saturating_sub(overlap))
                }
                BackfillDirection::Reconcile => watermark.earliest_known,
            },
        };

        let range = FetchRange::new(start, now);
        if range.is_empty() {
            debug!("{} {} is up to date", instrument, resolution);
            return Ok(None);
        }
        Ok(Some(range))
    }
}
