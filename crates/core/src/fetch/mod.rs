//! Budgeted, paced and retried provider access.
//!
//! This module contains:
//! - `budget`: The daily [`CallBudget`] and per-job [`Reservation`]s
//! - `pacer`: Minimum spacing between provider calls
//! - `retry`: [`RetryPolicy`] with exponential backoff and rate-limit cooldown
//! - `gateway`: [`ProviderGateway`], the one path to the provider
//! - `task`: Fetch tasks, jobs and their outcomes
//! - `scheduler`: [`FetchScheduler`], the worker pool

mod budget;
mod gateway;
mod pacer;
mod retry;
mod scheduler;
mod task;

pub use budget::{BudgetExhausted, BudgetUsage, CallBudget, Reservation};
pub use gateway::{CallError, Fetched, ProviderGateway};
pub use pacer::Pacer;
pub use retry::{RetryFailure, RetryPolicy};
pub use scheduler::{FetchScheduler, JobRunner};
pub use task::{FailureReason, FetchTask, InstrumentJob, TaskOutcome, TaskState};
