//! The real-time polling loop.
//!
//! One cooperative loop ticks every minute. A resolution is due on ticks
//! whose wall-clock minute is a multiple of its length. Outside the trading
//! session a tick does nothing. Inside it, each (instrument, resolution)
//! pair reserves one call, fetches the provider's recent window and feeds
//! the samples it has not fed before to the aggregator. The row at the feed
//! cursor is sent again as a revision, since the provider keeps updating
//! its newest row until the period ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use barsync_market_data::Resolution;

use super::actor::{AggregatorHandle, FlushReport};
use super::candle::FoldOutcome;
use crate::clock::Clock;
use crate::config::SessionEndPolicy;
use crate::errors::{Error, Result};
use crate::fetch::{CallBudget, FailureReason, ProviderGateway};
use crate::normalize::Normalizer;
use crate::session::TradingSession;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// What the real-time loop should poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealtimeOptions {
    pub instruments: Vec<String>,
    /// Intraday resolutions only; others are ignored.
    pub resolutions: Vec<Resolution>,
    pub tick_interval: Duration,
}

impl RealtimeOptions {
    pub fn new(instruments: Vec<String>, resolutions: Vec<Resolution>) -> Self {
        Self {
            instruments,
            resolutions: resolutions
                .into_iter()
                .filter(Resolution::is_intraday)
                .collect(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Counts from one in-session tick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub polled: usize,
    pub fed: usize,
    pub revised: usize,
    pub stale: usize,
    pub malformed: usize,
    pub deferred: usize,
    pub failed: usize,
    pub auth_failure: Option<FailureReason>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Outside trading hours; nothing was fetched.
    SessionClosed { flushed: Option<FlushReport> },
    /// In session, but no resolution was due this minute.
    Idle,
    Polled(TickSummary),
}

/// Why the real-time loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// A stop was requested.
    Stopped,
    /// The provider rejected the credentials; polling cannot continue.
    AuthFailed(FailureReason),
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopExit::Stopped => write!(f, "stopped on request"),
            LoopExit::AuthFailed(reason) => write!(f, "{}", reason),
        }
    }
}

#[derive(Default)]
struct PollResult {
    fed: usize,
    revised: usize,
    stale: usize,
    malformed: usize,
    deferred: bool,
    failure: Option<FailureReason>,
}

pub struct RealtimeScheduler {
    gateway: Arc<ProviderGateway>,
    budget: Arc<CallBudget>,
    aggregator: AggregatorHandle,
    normalizer: Normalizer,
    session: TradingSession,
    clock: Arc<dyn Clock>,
    options: RealtimeOptions,
    concurrency: usize,
    end_policy: SessionEndPolicy,
    flush_on_shutdown: bool,
    last_fed: Mutex<HashMap<(String, Resolution), DateTime<Utc>>>,
    was_open: AtomicBool,
}

impl RealtimeScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<ProviderGateway>,
        budget: Arc<CallBudget>,
        aggregator: AggregatorHandle,
        normalizer: Normalizer,
        session: TradingSession,
        clock: Arc<dyn Clock>,
        options: RealtimeOptions,
        concurrency: usize,
        end_policy: SessionEndPolicy,
        flush_on_shutdown: bool,
    ) -> Self {
        Self {
            gateway,
            budget,
            aggregator,
            normalizer,
            session,
            clock,
            options,
            concurrency: concurrency.max(1),
            end_policy,
            flush_on_shutdown,
            last_fed: Mutex::new(HashMap::new()),
            was_open: AtomicBool::new(false),
        }
    }

    pub fn aggregator(&self) -> &AggregatorHandle {
        &self.aggregator
    }

    fn lock_last_fed(&self) -> MutexGuard<'_, HashMap<(String, Resolution), DateTime<Utc>>> {
        self.last_fed.lock().unwrap_or_else(|poisoned| {
            warn!("Real-time feed cursor mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn due_resolutions(&self, now: DateTime<Utc>) -> Vec<Resolution> {
        let minute = now.timestamp().div_euclid(60);
        self.options
            .resolutions
            .iter()
            .copied()
            .filter(|r| {
                r.minutes()
                    .is_some_and(|m| m > 0 && minute % i64::from(m) == 0)
            })
            .collect()
    }

    /// Runs one tick of the loop.
    pub async fn tick(&self) -> TickOutcome {
        let now = self.clock.now();

        if !self.session.is_open(now) {
            let was_open = self.was_open.swap(false, Ordering::AcqRel);
            let mut flushed = None;
            if was_open && self.end_policy == SessionEndPolicy::FlushAtClose {
                match self.aggregator.flush_all().await {
                    Ok(report) => {
                        info!(
                            "Session closed, flushed {} open candles ({} pending)",
                            report.flushed, report.pending
                        );
                        flushed = Some(report);
                    }
                    Err(e) => error!("Flush at session close failed: {}", e),
                }
            }
            debug!("Session closed at {}, skipping tick", now);
            return TickOutcome::SessionClosed { flushed };
        }
        self.was_open.store(true, Ordering::Release);

        if let Err(e) = self.aggregator.retry_pending().await {
            error!("Could not retry parked candles: {}", e);
        }

        let due = self.due_resolutions(now);
        if due.is_empty() {
            return TickOutcome::Idle;
        }

        let pairs: Vec<(String, Resolution)> = self
            .options
            .instruments
            .iter()
            .flat_map(|instrument| due.iter().map(move |r| (instrument.clone(), *r)))
            .collect();

        let results: Vec<PollResult> = stream::iter(pairs)
            .map(|(instrument, resolution)| async move { self.poll(&instrument, resolution).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = TickSummary::default();
        for result in results {
            summary.polled += 1;
            summary.fed += result.fed;
            summary.revised += result.revised;
            summary.stale += result.stale;
            summary.malformed += result.malformed;
            if result.deferred {
                summary.deferred += 1;
            }
            if let Some(failure) = result.failure {
                summary.failed += 1;
                if failure.is_auth() && summary.auth_failure.is_none() {
                    summary.auth_failure = Some(failure);
                }
            }
        }
        debug!(
            "Tick at {}: polled {}, fed {}, deferred {}, failed {}",
            now, summary.polled, summary.fed, summary.deferred, summary.failed
        );
        TickOutcome::Polled(summary)
    }

    async fn poll(&self, instrument: &str, resolution: Resolution) -> PollResult {
        let reservation = match self.budget.reserve(1) {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!("Skipping {} {} this tick: {}", instrument, resolution, e);
                return PollResult {
                    deferred: true,
                    ..Default::default()
                };
            }
        };

        let fetched = match self
            .gateway
            .fetch_recent(&reservation, instrument, resolution)
            .await
        {
            Ok(fetched) => fetched,
            Err(failure) => {
                warn!(
                    "Real-time fetch of {} {} failed: {}",
                    instrument, resolution, failure.error
                );
                let reason = FailureReason::from(failure);
                return PollResult {
                    deferred: reason.defers(),
                    failure: (!reason.defers()).then_some(reason),
                    ..Default::default()
                };
            }
        };
        drop(reservation);

        let field_map = self.gateway.provider().field_map(resolution);
        let (samples, malformed) =
            self.normalizer
                .samples(instrument, resolution, &field_map, &fetched.records);

        let key = (instrument.to_string(), resolution);
        let cursor = self.lock_last_fed().get(&key).copied();
        let mut result = PollResult {
            malformed,
            ..Default::default()
        };

        let mut last = cursor;
        let mut revising = cursor;
        for sample in samples
            .into_iter()
            .filter(|s| cursor.map_or(true, |c| s.timestamp >= c))
        {
            let timestamp = sample.timestamp;
            let outcome = if revising.take() == Some(timestamp) {
                self.aggregator.revise(sample).await
            } else {
                self.aggregator.feed(sample).await
            };
            match outcome {
                Ok(FoldOutcome::Stale) => result.stale += 1,
                Ok(FoldOutcome::Revised) => result.revised += 1,
                Ok(_) => result.fed += 1,
                Err(e) => {
                    error!("Aggregator rejected sample for {}: {}", instrument, e);
                    result.failure = Some(FailureReason::Internal(e.to_string()));
                    break;
                }
            }
            last = Some(timestamp);
        }

        if let Some(last) = last {
            self.lock_last_fed().insert(key, last);
        }
        result
    }

    /// Ticks until `stop` flips to true, or an authentication failure.
    /// The current tick always runs to completion.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> LoopExit {
        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Real-time loop started for {} instruments at {:?}",
            self.options.instruments.len(),
            self.options.resolutions
        );

        let exit = loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break LoopExit::Stopped;
                    }
                    continue;
                }
            }
            if *stop.borrow() {
                break LoopExit::Stopped;
            }

            if let TickOutcome::Polled(TickSummary {
                auth_failure: Some(reason),
                ..
            }) = self.tick().await
            {
                error!("Stopping real-time loop: {}", reason);
                break LoopExit::AuthFailed(reason);
            }
        };

        if self.flush_on_shutdown {
            match self.aggregator.flush_all().await {
                Ok(report) => info!(
                    "Flushed {} open candles on shutdown ({} pending)",
                    report.flushed, report.pending
                ),
                Err(e) => error!("Flush on shutdown failed: {}", e),
            }
        }
        info!("Real-time loop stopped: {}", exit);
        exit
    }
}

/// Running real-time loop plus the aggregator it feeds.
pub struct RealtimeHandle {
    stop_tx: watch::Sender<bool>,
    loop_task: Option<JoinHandle<LoopExit>>,
    exit: Option<LoopExit>,
    aggregator_task: JoinHandle<()>,
}

fn loop_failed(e: tokio::task::JoinError) -> Error {
    Error::WorkerStopped(format!("real-time loop failed: {}", e))
}

impl RealtimeHandle {
    pub fn spawn(scheduler: RealtimeScheduler, aggregator_task: JoinHandle<()>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let loop_task = tokio::spawn(Arc::new(scheduler).run(stop_rx));
        Self {
            stop_tx,
            loop_task: Some(loop_task),
            exit: None,
            aggregator_task,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.loop_task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Resolves once the loop has ended, whether on request or on its own.
    /// Safe to drop before it resolves and to call again afterwards.
    pub async fn finished(&mut self) -> Result<LoopExit> {
        if let Some(task) = self.loop_task.as_mut() {
            let exit = task.await.map_err(loop_failed)?;
            self.loop_task = None;
            self.exit = Some(exit);
        }
        self.exit
            .clone()
            .ok_or_else(|| Error::Unexpected("real-time loop exit was not recorded".to_string()))
    }

    /// Signals the loop, waits for it, then waits for the aggregator to
    /// drain its mailbox.
    pub async fn stop(mut self) -> Result<LoopExit> {
        // The loop may already have exited on its own.
        let _ = self.stop_tx.send(true);
        let exit = self.finished().await?;
        self.aggregator_task
            .await
            .map_err(|e| Error::WorkerStopped(format!("candle aggregator failed: {}", e)))?;
        Ok(exit)
    }
}
