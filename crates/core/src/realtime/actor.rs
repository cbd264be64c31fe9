//! The task that owns the candle book.
//!
//! Samples are folded strictly in mailbox order. Closed candles are written
//! through [`BarStore::upsert_one`]; a write that fails is parked in a
//! pending list and retried on the next `RetryPending` or `FlushAll`.

use std::sync::Arc;

use chrono::Weekday;
use log::{debug, error, info};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::candle::{CandleBook, FoldOutcome};
use crate::bars::{BarStore, PriceBar};
use crate::clock::Clock;
use crate::errors::{Error, Result};
use crate::normalize::Sample;

const MAILBOX_SIZE: usize = 1024;

/// Counts from a flush-all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub flushed: usize,
    /// Bars whose write failed and remain parked.
    pub pending: usize,
}

enum Command {
    Sample {
        sample: Sample,
        revision: bool,
        reply: oneshot::Sender<FoldOutcome>,
    },
    FlushAll {
        reply: oneshot::Sender<FlushReport>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<PriceBar>>,
    },
    RetryPending {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle for talking to the aggregator task.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Command>,
}

fn stopped() -> Error {
    Error::WorkerStopped("candle aggregator has stopped".to_string())
}

impl AggregatorHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())
    }

    /// Folds one sample; a closed candle is persisted before this returns.
    pub async fn feed(&self, sample: Sample) -> Result<FoldOutcome> {
        self.request(|reply| Command::Sample {
            sample,
            revision: false,
            reply,
        })
        .await
    }

    /// Feeds a newer revision of the sample last fed at the same timestamp.
    pub async fn revise(&self, sample: Sample) -> Result<FoldOutcome> {
        self.request(|reply| Command::Sample {
            sample,
            revision: true,
            reply,
        })
        .await
    }

    /// Closes and persists every open candle.
    pub async fn flush_all(&self) -> Result<FlushReport> {
        self.request(|reply| Command::FlushAll { reply }).await
    }

    /// Open candles as bars.
    pub async fn snapshot(&self) -> Result<Vec<PriceBar>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Retries parked writes. Returns how many are still parked.
    pub async fn retry_pending(&self) -> Result<usize> {
        self.request(|reply| Command::RetryPending { reply }).await
    }
}

struct Aggregator {
    book: CandleBook,
    pending: Vec<PriceBar>,
    store: Arc<dyn BarStore>,
    clock: Arc<dyn Clock>,
}

impl Aggregator {
    async fn persist(&mut self, bar: PriceBar) -> bool {
        match self.store.upsert_one(&bar).await {
            Ok(inserted) => {
                debug!(
                    "Flushed {} {} candle at {} ({})",
                    bar.instrument,
                    bar.resolution,
                    bar.period_start,
                    if inserted { "new" } else { "updated" }
                );
                true
            }
            Err(e) => {
                error!(
                    "Failed to flush {} {} candle at {}, keeping it for retry: {}",
                    bar.instrument, bar.resolution, bar.period_start, e
                );
                self.pending.push(bar);
                false
            }
        }
    }

    async fn retry_pending(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let parked = std::mem::take(&mut self.pending);
        let total = parked.len();
        for bar in parked {
            self.persist(bar).await;
        }
        info!(
            "Retried {} parked candles, {} still pending",
            total,
            self.pending.len()
        );
        self.pending.len()
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Sample {
                sample,
                revision,
                reply,
            } => {
                let now = self.clock.now();
                let outcome = if revision {
                    self.book.revise(&sample, now)
                } else {
                    self.book.apply(&sample, now)
                };
                if let FoldOutcome::Rolled { flushed } = &outcome {
                    self.persist(flushed.clone()).await;
                }
                let _ = reply.send(outcome);
            }
            Command::FlushAll { reply } => {
                self.retry_pending().await;
                let bars = self.book.drain();
                let mut flushed = 0;
                for bar in bars {
                    if self.persist(bar).await {
                        flushed += 1;
                    }
                }
                let _ = reply.send(FlushReport {
                    flushed,
                    pending: self.pending.len(),
                });
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.book.snapshot());
            }
            Command::RetryPending { reply } => {
                let remaining = self.retry_pending().await;
                let _ = reply.send(remaining);
            }
        }
    }
}

/// Spawns the aggregator. It runs until every handle is dropped.
pub fn spawn_aggregator(
    store: Arc<dyn BarStore>,
    clock: Arc<dyn Clock>,
    week_end: Weekday,
) -> (AggregatorHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Command>(MAILBOX_SIZE);
    let mut aggregator = Aggregator {
        book: CandleBook::new(week_end),
        pending: Vec::new(),
        store,
        clock,
    };

    let join = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            aggregator.handle(command).await;
        }
        if !aggregator.book.is_empty() || !aggregator.pending.is_empty() {
            error!(
                "Candle aggregator stopped with {} open and {} parked candles",
                aggregator.book.len(),
                aggregator.pending.len()
            );
        }
        debug!("Candle aggregator stopped");
    });

    (AggregatorHandle { tx }, join)
}
