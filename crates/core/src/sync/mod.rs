//! Backfill orchestration: planning from watermarks, running jobs, and
//! reporting per series.

mod planner;
mod report;
mod service;

pub use planner::{SyncPlan, SyncPlanner};
pub use report::{BatchSummary, SyncReport, SyncStatus};
pub use service::BackfillRunner;
