use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use barsync_market_data::Resolution;

use crate::bars::UpsertSummary;
use crate::watermark::FetchRange;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not admitted (budget) or still rate limited; safe to resubmit.
    Deferred,
}

/// One (instrument, resolution, range) unit of backfill work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTask {
    pub id: Uuid,
    pub instrument: String,
    pub resolution: Resolution,
    pub range: FetchRange,
    pub attempt_count: u32,
    pub state: TaskState,
}

impl FetchTask {
    pub fn new(instrument: impl Into<String>, resolution: Resolution, range: FetchRange) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: instrument.into(),
            resolution,
            range,
            attempt_count: 0,
            state: TaskState::Pending,
        }
    }

    /// Weekly bars are synthesized from stored dailies, not fetched.
    pub fn is_synthesized(&self) -> bool {
        self.resolution == Resolution::Weekly
    }

    pub fn calls_required(&self) -> u32 {
        if self.is_synthesized() {
            0
        } else {
            1
        }
    }
}

/// Execution order inside a job: dailies first so weekly synthesis sees
/// them, then the remaining coarse series, then intraday.
fn execution_rank(resolution: Resolution) -> u8 {
    match resolution {
        Resolution::Daily => 0,
        Resolution::Weekly => 1,
        Resolution::Monthly => 2,
        Resolution::FifteenMinutes => 3,
        Resolution::FiveMinutes => 4,
        Resolution::OneMinute => 5,
    }
}

/// All tasks for one instrument, run in order by a single worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrumentJob {
    pub instrument: String,
    pub tasks: Vec<FetchTask>,
}

impl InstrumentJob {
    pub fn new(instrument: impl Into<String>, mut tasks: Vec<FetchTask>) -> Self {
        tasks.sort_by_key(|t| execution_rank(t.resolution));
        Self {
            instrument: instrument.into(),
            tasks,
        }
    }

    pub fn calls_required(&self) -> u32 {
        self.tasks.iter().map(FetchTask::calls_required).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Why a task did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum FailureReason {
    #[error("call budget exhausted")]
    BudgetExhausted,

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("gave up after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("provider error: {0}")]
    Provider(String),

    /// The provider kept returning full pages past the page limit.
    #[error("history only reached {oldest} after {pages} pages")]
    HistoryTruncated {
        pages: u32,
        oldest: chrono::DateTime<chrono::Utc>,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("{0} prerequisite failed")]
    DependencyFailed(Resolution),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FailureReason {
    /// Reasons that leave a task `Deferred` rather than `Failed`.
    pub fn defers(&self) -> bool {
        matches!(
            self,
            FailureReason::BudgetExhausted | FailureReason::RateLimited { .. }
        )
    }

    /// Whether resubmitting the same work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::BudgetExhausted
                | FailureReason::RateLimited { .. }
                | FailureReason::RetriesExhausted { .. }
                | FailureReason::Persistence(_)
                | FailureReason::DependencyFailed(_)
                | FailureReason::Internal(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FailureReason::Auth(_))
    }
}

/// Result of running one task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task: FetchTask,
    pub summary: UpsertSummary,
    pub malformed: usize,
    /// Normalized rows that did not make it into the store.
    pub lost: usize,
    pub failure: Option<FailureReason>,
}

impl TaskOutcome {
    pub fn succeeded(mut task: FetchTask, summary: UpsertSummary, malformed: usize) -> Self {
        task.state = TaskState::Succeeded;
        Self {
            task,
            summary,
            malformed,
            lost: 0,
            failure: None,
        }
    }

    pub fn failed(mut task: FetchTask, reason: FailureReason) -> Self {
        task.state = if reason.defers() {
            TaskState::Deferred
        } else {
            TaskState::Failed
        };
        Self {
            task,
            summary: UpsertSummary::default(),
            malformed: 0,
            lost: 0,
            failure: Some(reason),
        }
    }

    /// Records rows that were fetched and normalized before the failure.
    pub fn with_counts(mut self, malformed: usize, lost: usize) -> Self {
        self.malformed = malformed;
        self.lost = lost;
        self
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}
