use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use barsync_market_data::Resolution;

use super::report::SyncReport;
use crate::bars::BarStore;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::errors::Result;
use crate::fetch::{FetchTask, InstrumentJob};
use crate::normalize::WeeklySynthesizer;
use crate::watermark::{FetchRange, WatermarkResolver};

/// Jobs to run plus the series that need nothing.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub jobs: Vec<InstrumentJob>,
    pub up_to_date: Vec<SyncReport>,
}

impl SyncPlan {
    pub fn calls_required(&self) -> u32 {
        self.jobs.iter().map(InstrumentJob::calls_required).sum()
    }
}

/// Turns requested series into fetch tasks using the stored watermarks.
///
/// Weekly series are never fetched. Requesting one adds a Daily task to the
/// job and a Weekly synthesis task that rebuilds every week touched by the
/// new dailies.
pub struct SyncPlanner {
    resolver: WatermarkResolver,
    store: Arc<dyn BarStore>,
    clock: Arc<dyn Clock>,
    synthesizer: WeeklySynthesizer,
    history_horizon: Duration,
    intraday_horizon: Duration,
}

impl SyncPlanner {
    pub fn new(config: &SyncConfig, store: Arc<dyn BarStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver: WatermarkResolver::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                config.backfill_direction,
                config.overlap_periods,
                config.week_end,
            ),
            store,
            clock,
            synthesizer: WeeklySynthesizer::new(config.week_end),
            history_horizon: config.horizon_for(Resolution::Daily),
            intraday_horizon: config.horizon_for(Resolution::OneMinute),
        }
    }

    fn horizon(&self, resolution: Resolution) -> Duration {
        if resolution.is_intraday() {
            self.intraday_horizon
        } else {
            self.history_horizon
        }
    }

    pub fn plan(&self, instruments: &[String], resolutions: &[Resolution]) -> Result<SyncPlan> {
        let mut plan = SyncPlan::default();
        for instrument in instruments {
            let (job, up_to_date) = self.plan_instrument(instrument, resolutions)?;
            if let Some(job) = job {
                plan.jobs.push(job);
            }
            plan.up_to_date.extend(up_to_date);
        }
        debug!(
            "Planned {} jobs ({} calls), {} series up to date",
            plan.jobs.len(),
            plan.calls_required(),
            plan.up_to_date.len()
        );
        Ok(plan)
    }

    pub fn plan_instrument(
        &self,
        instrument: &str,
        resolutions: &[Resolution],
    ) -> Result<(Option<InstrumentJob>, Vec<SyncReport>)> {
        let requested: BTreeSet<Resolution> = resolutions.iter().copied().collect();
        let wants_weekly = requested.contains(&Resolution::Weekly);

        let mut fetched: BTreeSet<Resolution> = requested
            .iter()
            .copied()
            .filter(|r| *r != Resolution::Weekly)
            .collect();
        if wants_weekly {
            fetched.insert(Resolution::Daily);
        }

        let mut tasks = Vec::new();
        let mut up_to_date = Vec::new();
        let mut daily_range = None;

        for resolution in fetched {
            match self
                .resolver
                .resolve(instrument, resolution, self.horizon(resolution))?
            {
                Some(range) => {
                    if resolution == Resolution::Daily {
                        daily_range = Some(range);
                    }
                    tasks.push(FetchTask::new(instrument, resolution, range));
                }
                None if requested.contains(&resolution) => {
                    up_to_date.push(SyncReport::up_to_date(instrument, resolution));
                }
                None => {}
            }
        }

        if wants_weekly {
            match self.weekly_range(instrument, daily_range)? {
                Some(range) => tasks.push(FetchTask::new(instrument, Resolution::Weekly, range)),
                None => up_to_date.push(SyncReport::up_to_date(instrument, Resolution::Weekly)),
            }
        }

        let job = (!tasks.is_empty()).then(|| InstrumentJob::new(instrument, tasks));
        Ok((job, up_to_date))
    }

    /// Range of weeks to rebuild, or `None` when the weekly series already
    /// covers every stored daily.
    fn weekly_range(
        &self,
        instrument: &str,
        daily_range: Option<FetchRange>,
    ) -> Result<Option<FetchRange>> {
        let weekly = self.store.bounds(instrument, Resolution::Weekly)?;
        let daily = self.store.bounds(instrument, Resolution::Daily)?;

        let from: Option<DateTime<Utc>> = match (daily_range, weekly, daily) {
            // Dailies are being fetched; weeks without a weekly bar yet are
            // rebuilt from the earliest stored daily.
            (Some(range), None, Some((daily_earliest, _))) => Some(range.start.min(daily_earliest)),
            (Some(range), _, _) => Some(range.start),
            (None, _, None) => None,
            (None, None, Some((daily_earliest, _))) => Some(daily_earliest),
            (None, Some((_, weekly_latest)), Some((_, daily_latest))) => {
                (weekly_latest < self.synthesizer.week_start(daily_latest)).then_some(weekly_latest)
            }
        };

        Ok(from.map(|start| FetchRange::new(self.synthesizer.week_start(start), self.clock.now())))
    }
}
