use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use barsync_market_data::Resolution;

use crate::fetch::{FailureReason, TaskOutcome, TaskState};
use crate::watermark::FetchRange;

/// Status of one series after a sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Succeeded,
    /// Nothing was missing; no task was run.
    UpToDate,
    Failed,
    /// Not admitted or still rate limited; resubmit later.
    Deferred,
}

/// Result of syncing one (instrument, resolution) series.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub instrument: String,
    pub resolution: Resolution,
    pub status: SyncStatus,
    pub inserted: usize,
    pub updated: usize,
    /// Malformed rows plus rows lost to a failed write.
    pub failed: usize,
    pub malformed: usize,
    pub attempts: u32,
    pub range: Option<FetchRange>,
    pub failure: Option<FailureReason>,
}

impl SyncReport {
    pub fn up_to_date(instrument: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            instrument: instrument.into(),
            resolution,
            status: SyncStatus::UpToDate,
            inserted: 0,
            updated: 0,
            failed: 0,
            malformed: 0,
            attempts: 0,
            range: None,
            failure: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.status, SyncStatus::Failed | SyncStatus::Deferred)
            && self
                .failure
                .as_ref()
                .is_some_and(FailureReason::is_retryable)
    }
}

impl From<TaskOutcome> for SyncReport {
    fn from(outcome: TaskOutcome) -> Self {
        let status = match outcome.task.state {
            TaskState::Succeeded => SyncStatus::Succeeded,
            TaskState::Deferred => SyncStatus::Deferred,
            _ if outcome.failure.is_none() => SyncStatus::Succeeded,
            _ => SyncStatus::Failed,
        };
        Self {
            instrument: outcome.task.instrument,
            resolution: outcome.task.resolution,
            status,
            inserted: outcome.summary.inserted,
            updated: outcome.summary.updated,
            failed: outcome.malformed + outcome.lost,
            malformed: outcome.malformed,
            attempts: outcome.task.attempt_count,
            range: Some(outcome.task.range),
            failure: outcome.failure,
        }
    }
}

/// Aggregate of a batch run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub reports: Vec<SyncReport>,
}

impl BatchSummary {
    pub fn new(reports: Vec<SyncReport>) -> Self {
        Self { reports }
    }

    fn count(&self, status: SyncStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(SyncStatus::Succeeded)
    }

    pub fn up_to_date(&self) -> usize {
        self.count(SyncStatus::UpToDate)
    }

    pub fn failed(&self) -> usize {
        self.count(SyncStatus::Failed)
    }

    pub fn deferred(&self) -> usize {
        self.count(SyncStatus::Deferred)
    }

    pub fn inserted(&self) -> usize {
        self.reports.iter().map(|r| r.inserted).sum()
    }

    pub fn updated(&self) -> usize {
        self.reports.iter().map(|r| r.updated).sum()
    }

    pub fn malformed(&self) -> usize {
        self.reports.iter().map(|r| r.malformed).sum()
    }

    /// Series worth resubmitting: failed or deferred with a retryable reason.
    pub fn retry_subset(&self) -> Vec<(String, Resolution)> {
        self.reports
            .iter()
            .filter(|r| r.is_retryable())
            .map(|r| (r.instrument.clone(), r.resolution))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The first authentication failure, if any series hit one.
    pub fn auth_failure(&self) -> Option<&FailureReason> {
        self.reports
            .iter()
            .filter_map(|r| r.failure.as_ref())
            .find(|f| f.is_auth())
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} up to date, {} failed, {} deferred; {} inserted, {} updated, {} malformed",
            self.succeeded(),
            self.up_to_date(),
            self.failed(),
            self.deferred(),
            self.inserted(),
            self.updated(),
            self.malformed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::UpsertSummary;
    use crate::fetch::FetchTask;
    use chrono::{TimeZone, Utc};

    fn task(symbol: &str, resolution: Resolution) -> FetchTask {
        FetchTask::new(
            symbol,
            resolution,
            FetchRange::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            ),
        )
    }

    #[test]
    fn test_report_from_outcome_counts_lost_rows() {
        let outcome = TaskOutcome::failed(
            task("TST1", Resolution::Daily),
            FailureReason::Persistence("disk I/O error".into()),
        )
        .with_counts(2, 5);

        let report = SyncReport::from(outcome);
        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.failed, 7);
        assert_eq!(report.malformed, 2);
        assert!(report.is_retryable());
    }

    #[test]
    fn test_retry_subset_lists_only_retryable_series() {
        let summary = BatchSummary::new(vec![
            SyncReport::from(TaskOutcome::succeeded(
                task("AAA", Resolution::Daily),
                UpsertSummary {
                    inserted: 3,
                    updated: 1,
                },
                0,
            )),
            SyncReport::from(TaskOutcome::failed(
                task("BBB", Resolution::Daily),
                FailureReason::BudgetExhausted,
            )),
            SyncReport::from(TaskOutcome::failed(
                task("BBB", Resolution::Weekly),
                FailureReason::DependencyFailed(Resolution::Daily),
            )),
            SyncReport::from(TaskOutcome::failed(
                task("CCC", Resolution::Monthly),
                FailureReason::Provider("symbol not found".into()),
            )),
            SyncReport::up_to_date("DDD", Resolution::Daily),
        ]);

        assert_eq!(
            summary.retry_subset(),
            vec![
                ("BBB".to_string(), Resolution::Daily),
                ("BBB".to_string(), Resolution::Weekly)
            ]
        );
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.deferred(), 1);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.up_to_date(), 1);
        assert_eq!(summary.inserted(), 3);
        assert!(summary.auth_failure().is_none());
    }
}
