//! Fixed-size worker pool for instrument jobs.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::budget::{CallBudget, Reservation};
use super::task::{FailureReason, InstrumentJob, TaskOutcome};
use crate::errors::{Error, Result};

/// Queue depth per worker before `submit` starts waiting.
const QUEUE_DEPTH_PER_WORKER: usize = 16;

/// Executes one admitted job. The reservation covers the job's planned
/// calls and is released when dropped.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: InstrumentJob, reservation: Reservation) -> Vec<TaskOutcome>;
}

struct QueuedJob {
    job: InstrumentJob,
    reply: oneshot::Sender<Vec<TaskOutcome>>,
}

/// Every task of `job` failed with the same reason.
fn fail_all(job: &InstrumentJob, reason: FailureReason) -> Vec<TaskOutcome> {
    job.tasks
        .iter()
        .cloned()
        .map(|task| TaskOutcome::failed(task, reason.clone()))
        .collect()
}

pub struct FetchScheduler {
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FetchScheduler {
    /// Spawns `worker_count` workers draining a shared queue.
    pub fn start(
        worker_count: usize,
        budget: Arc<CallBudget>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::channel::<QueuedJob>(worker_count * QUEUE_DEPTH_PER_WORKER);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let budget = Arc::clone(&budget);
                let runner = Arc::clone(&runner);
                tokio::spawn(async move {
                    loop {
                        let next = { rx.lock().await.recv().await };
                        let Some(QueuedJob { job, reply }) = next else {
                            break;
                        };
                        let outcomes = run_admitted(worker_id, job, &budget, &runner).await;
                        // The submitter may have gone away; nothing to do then.
                        let _ = reply.send(outcomes);
                    }
                    debug!("Fetch worker {} stopped", worker_id);
                })
            })
            .collect();

        info!("Fetch scheduler started with {} workers", worker_count);
        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<QueuedJob>>> {
        self.sender.lock().unwrap_or_else(|poisoned| {
            warn!("Scheduler sender mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Queues `job` and waits for its outcomes.
    pub async fn submit(&self, job: InstrumentJob) -> Result<Vec<TaskOutcome>> {
        let sender = self
            .lock_sender()
            .clone()
            .ok_or_else(|| Error::WorkerStopped("fetch scheduler is shut down".to_string()))?;

        if job.is_empty() {
            return Ok(Vec::new());
        }

        let tasks = job.clone();
        let (reply, outcome) = oneshot::channel();
        sender
            .send(QueuedJob { job, reply })
            .await
            .map_err(|_| Error::WorkerStopped("fetch workers are gone".to_string()))?;

        match outcome.await {
            Ok(outcomes) => Ok(outcomes),
            Err(_) => {
                error!(
                    "Worker dropped job for {} without reporting",
                    tasks.instrument
                );
                Ok(fail_all(
                    &tasks,
                    FailureReason::Internal("worker dropped the job".to_string()),
                ))
            }
        }
    }

    /// Runs all jobs concurrently; one job's failure never affects another.
    pub async fn run_batch(&self, jobs: Vec<InstrumentJob>) -> Vec<TaskOutcome> {
        let runs = jobs.into_iter().map(|job| async move {
            let fallback = job.clone();
            match self.submit(job).await {
                Ok(outcomes) => outcomes,
                Err(e) => fail_all(&fallback, FailureReason::Internal(e.to_string())),
            }
        });
        join_all(runs).await.into_iter().flatten().collect()
    }

    /// Closes the queue and waits for workers to finish what they hold.
    pub async fn shutdown(&self) {
        self.lock_sender().take();
        let workers: Vec<_> = {
            let mut guard = self.workers.lock().unwrap_or_else(|poisoned| {
                warn!("Scheduler worker mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            guard.drain(..).collect()
        };
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Fetch worker ended abnormally: {}", e);
            }
        }
        info!("Fetch scheduler stopped");
    }
}

async fn run_admitted(
    worker_id: usize,
    job: InstrumentJob,
    budget: &Arc<CallBudget>,
    runner: &Arc<dyn JobRunner>,
) -> Vec<TaskOutcome> {
    let required = job.calls_required();
    let reservation = match budget.reserve(required) {
        Ok(reservation) => reservation,
        Err(e) => {
            warn!("Deferring job for {}: {}", job.instrument, e);
            return fail_all(&job, FailureReason::BudgetExhausted);
        }
    };

    debug!(
        "Worker {} running {} tasks for {} ({} calls reserved)",
        worker_id,
        job.tasks.len(),
        job.instrument,
        required
    );

    // Run on its own task so a panic is contained to this job.
    let fallback = job.clone();
    let runner = Arc::clone(runner);
    let handle = tokio::spawn(async move { runner.run_job(job, reservation).await });
    match handle.await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            error!("Job for {} aborted: {}", fallback.instrument, e);
            fail_all(&fallback, FailureReason::Internal(e.to_string()))
        }
    }
}
