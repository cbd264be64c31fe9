use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use barsync_market_data::Resolution;

use crate::bars::{BarStore, PriceBar};
use crate::fetch::{
    FailureReason, FetchTask, InstrumentJob, JobRunner, ProviderGateway, Reservation,
    TaskOutcome, TaskState,
};
use crate::normalize::{Normalizer, WeeklySynthesizer};
use crate::watermark::FetchRange;

/// Runs backfill jobs: fetch, normalize and store each series in order,
/// then rebuild weekly bars from the stored dailies.
///
/// Paged providers are walked backwards from the end of the task range until
/// a short page arrives or the range start is reached. Every page is charged
/// to the job's reservation.
pub struct BackfillRunner {
    gateway: Arc<ProviderGateway>,
    store: Arc<dyn BarStore>,
    normalizer: Normalizer,
    synthesizer: WeeklySynthesizer,
    max_pages: u32,
}

impl BackfillRunner {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        store: Arc<dyn BarStore>,
        normalizer: Normalizer,
        synthesizer: WeeklySynthesizer,
        max_pages: u32,
    ) -> Self {
        Self {
            gateway,
            store,
            normalizer,
            synthesizer,
            max_pages: max_pages.max(1),
        }
    }

    async fn fetch_and_store(&self, mut task: FetchTask, reservation: &Reservation) -> TaskOutcome {
        debug!(
            "Fetching {} {} from {} to {}",
            task.instrument, task.resolution, task.range.start, task.range.end
        );
        let provider = self.gateway.provider();
        let field_map = provider.field_map(task.resolution);
        let page_rows = provider.history_page_rows(task.resolution);

        // Pages are collected in full before anything is stored, so an
        // interrupted task never leaves a hole below the stored watermark.
        let mut bars: BTreeMap<DateTime<Utc>, PriceBar> = BTreeMap::new();
        let mut malformed = 0;
        let mut pages = 0;
        let mut window = task.range;

        loop {
            let fetched = match self
                .gateway
                .fetch_history(reservation, &task.instrument, task.resolution, &window)
                .await
            {
                Ok(fetched) => fetched,
                Err(failure) => {
                    task.attempt_count += failure.attempts;
                    warn!(
                        "Fetch of {} {} failed: {}",
                        task.instrument, task.resolution, failure.error
                    );
                    return TaskOutcome::failed(task, failure.into());
                }
            };
            task.attempt_count += fetched.attempts;
            pages += 1;

            let batch = self.normalizer.normalize(
                &task.instrument,
                task.resolution,
                &field_map,
                &fetched.records,
            );
            if batch.malformed > 0 {
                warn!(
                    "{} of {} {} {} records were malformed",
                    batch.malformed,
                    fetched.records.len(),
                    task.instrument,
                    task.resolution
                );
            }
            malformed += batch.malformed;

            let previous_oldest = bars.keys().next().copied();
            let oldest = batch.bars.iter().map(|b| b.period_start).min();
            for bar in batch.bars {
                bars.entry(bar.period_start).or_insert(bar);
            }

            let full_page = page_rows.is_some_and(|rows| fetched.records.len() >= rows);
            let oldest = match oldest {
                Some(oldest) if full_page && oldest > task.range.start => oldest,
                // Short page or start reached: the range is covered.
                _ => break,
            };
            if previous_oldest.is_some_and(|seen| oldest >= seen) {
                debug!("{} {} history ends at {}", task.instrument, task.resolution, oldest);
                break;
            }
            if pages >= self.max_pages {
                warn!(
                    "{} {} history stopped at {} after {} pages",
                    task.instrument, task.resolution, oldest, pages
                );
                return TaskOutcome::failed(task, FailureReason::HistoryTruncated { pages, oldest })
                    .with_counts(malformed, bars.len());
            }
            window = FetchRange::new(task.range.start, task.resolution.step(oldest, -1));
        }

        if pages > 1 {
            debug!("Fetched {} {} in {} pages", task.instrument, task.resolution, pages);
        }
        let bars: Vec<PriceBar> = bars.into_values().collect();
        self.persist(task, &bars, malformed).await
    }

    async fn synthesize_weekly(&self, task: FetchTask) -> TaskOutcome {
        let from = self.synthesizer.week_start(task.range.start);
        let daily = match self
            .store
            .range(&task.instrument, Resolution::Daily, from, task.range.end)
        {
            Ok(daily) => daily,
            Err(e) => {
                error!("Reading dailies for {} failed: {}", task.instrument, e);
                return TaskOutcome::failed(task, FailureReason::Persistence(e.to_string()));
            }
        };

        let weekly = self.synthesizer.synthesize(&daily);
        debug!(
            "Synthesized {} weekly bars for {} from {} dailies",
            weekly.len(),
            task.instrument,
            daily.len()
        );
        self.persist(task, &weekly, 0).await
    }

    async fn persist(&self, task: FetchTask, bars: &[PriceBar], malformed: usize) -> TaskOutcome {
        if bars.is_empty() {
            return TaskOutcome::succeeded(task, Default::default(), malformed);
        }
        match self.store.upsert_batch(bars).await {
            Ok(summary) => {
                debug!(
                    "Stored {} {} bars for {} ({} new, {} updated)",
                    summary.total(),
                    task.resolution,
                    task.instrument,
                    summary.inserted,
                    summary.updated
                );
                TaskOutcome::succeeded(task, summary, malformed)
            }
            Err(e) => {
                error!(
                    "Failed to save {} {} bars: {}",
                    task.instrument, task.resolution, e
                );
                TaskOutcome::failed(task, FailureReason::Persistence(e.to_string()))
                    .with_counts(malformed, bars.len())
            }
        }
    }
}

#[async_trait]
impl JobRunner for BackfillRunner {
    async fn run_job(&self, job: InstrumentJob, reservation: Reservation) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::with_capacity(job.tasks.len());
        let mut daily_ok: Option<bool> = None;
        let mut fatal: Option<FailureReason> = None;

        for mut task in job.tasks {
            if let Some(reason) = &fatal {
                outcomes.push(TaskOutcome::failed(task, reason.clone()));
                continue;
            }

            task.state = TaskState::Running;
            let outcome = if task.is_synthesized() {
                if daily_ok == Some(false) {
                    TaskOutcome::failed(task, FailureReason::DependencyFailed(Resolution::Daily))
                } else {
                    self.synthesize_weekly(task).await
                }
            } else {
                self.fetch_and_store(task, &reservation).await
            };

            if outcome.task.resolution == Resolution::Daily {
                daily_ok = Some(outcome.is_success());
            }
            if let Some(reason) = outcome.failure.as_ref().filter(|f| f.is_auth()) {
                fatal = Some(reason.clone());
            }
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            "Job for {} finished: {}/{} tasks succeeded",
            job.instrument,
            succeeded,
            outcomes.len()
        );
        outcomes
    }
}
