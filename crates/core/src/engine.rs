//! The engine facade wiring every component together.
//!
//! # Architecture
//!
//! ```text
//! SyncEngine
//!       │
//!       ├─► SyncPlanner ──► WatermarkResolver ──► BarStore (bounds)
//!       ├─► FetchScheduler ──► BackfillRunner
//!       │                          ├─► ProviderGateway (pacer, budget, credentials, retry)
//!       │                          ├─► Normalizer / WeeklySynthesizer
//!       │                          └─► BarStore (upsert_batch)
//!       └─► RealtimeScheduler ──► aggregator task ──► BarStore (upsert_one)
//! ```

use std::sync::Arc;

use log::{error, info};

use barsync_market_data::{MarketDataProvider, Resolution};

use crate::bars::BarStore;
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::config::SyncConfig;
use crate::credentials::{CredentialManager, TokenStore};
use crate::errors::{Error, Result};
use crate::fetch::{BudgetUsage, CallBudget, FetchScheduler, Pacer, ProviderGateway, RetryPolicy};
use crate::normalize::{Normalizer, WeeklySynthesizer};
use crate::realtime::{
    spawn_aggregator, LoopExit, RealtimeHandle, RealtimeOptions, RealtimeScheduler,
};
use crate::session::TradingSession;
use crate::sync::{BackfillRunner, BatchSummary, SyncPlanner, SyncReport};

/// External collaborators of the engine.
pub struct EngineDeps {
    pub provider: Arc<dyn MarketDataProvider>,
    pub store: Arc<dyn BarStore>,
    pub token_store: Arc<dyn TokenStore>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl EngineDeps {
    /// Deps using the system clock and tokio sleep.
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn BarStore>,
        token_store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            provider,
            store,
            token_store,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    session: TradingSession,
    store: Arc<dyn BarStore>,
    clock: Arc<dyn Clock>,
    credentials: Arc<CredentialManager>,
    budget: Arc<CallBudget>,
    gateway: Arc<ProviderGateway>,
    planner: SyncPlanner,
    scheduler: FetchScheduler,
}

impl SyncEngine {
    /// Builds the engine and starts its fetch workers. Must be called from
    /// within a tokio runtime.
    pub fn new(config: SyncConfig, deps: EngineDeps) -> Result<Self> {
        config.validate()?;
        let session = TradingSession::from_config(&config.session)?;
        let EngineDeps {
            provider,
            store,
            token_store,
            clock,
            sleeper,
        } = deps;

        let retry = RetryPolicy::new(&config.retry, sleeper);
        let credentials = Arc::new(CredentialManager::new(
            Arc::clone(&provider),
            token_store,
            Arc::clone(&clock),
            retry.clone(),
            config.token_safety_margin(),
        ));
        let budget = CallBudget::new(
            config.daily_call_budget,
            session.timezone(),
            Arc::clone(&clock),
        );
        let pacer = Arc::new(Pacer::new(config.min_call_delay()));
        let gateway = Arc::new(ProviderGateway::new(
            Arc::clone(&provider),
            Arc::clone(&credentials),
            pacer,
            retry,
        ));

        let runner = Arc::new(BackfillRunner::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            Normalizer::new(config.week_end),
            WeeklySynthesizer::new(config.week_end),
            config.max_history_pages,
        ));
        let scheduler = FetchScheduler::start(config.worker_count, Arc::clone(&budget), runner);
        let planner = SyncPlanner::new(&config, Arc::clone(&store), Arc::clone(&clock));

        info!(
            "Sync engine ready: provider '{}', {} instruments, budget {}/day",
            provider.id(),
            config.instruments.len(),
            config.daily_call_budget
        );

        Ok(Self {
            config,
            session,
            store,
            clock,
            credentials,
            budget,
            gateway,
            planner,
            scheduler,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn budget_usage(&self) -> BudgetUsage {
        self.budget.usage()
    }

    /// Startup check: the store answers and a token can be acquired.
    pub async fn bootstrap(&self) -> Result<()> {
        self.store.ping().map_err(|e| {
            error!("Bar store is unreachable: {}", e);
            e
        })?;
        let token = self.credentials.acquire().await?;
        info!("Bootstrap complete, token valid until {}", token.expires_at);
        Ok(())
    }

    /// Syncs one series. Requesting Weekly also syncs Daily; only the
    /// requested series is reported.
    pub async fn sync_instrument(
        &self,
        symbol: &str,
        resolution: Resolution,
    ) -> Result<SyncReport> {
        let reports = self
            .run_backfill_batch(&[symbol.to_string()], &[resolution])
            .await?;
        reports
            .into_iter()
            .find(|r| r.resolution == resolution)
            .ok_or_else(|| {
                Error::Unexpected(format!("no report produced for {} {}", symbol, resolution))
            })
    }

    /// Backfills every (instrument, resolution) pair. Task failures are
    /// reported per series; an authentication failure fails the batch.
    pub async fn run_backfill_batch(
        &self,
        instruments: &[String],
        resolutions: &[Resolution],
    ) -> Result<Vec<SyncReport>> {
        let plan = self.planner.plan(instruments, resolutions)?;
        info!(
            "Backfill: {} jobs needing {} calls ({} available)",
            plan.jobs.len(),
            plan.calls_required(),
            self.budget.usage().available()
        );

        let mut reports = plan.up_to_date;
        let outcomes = self.scheduler.run_batch(plan.jobs).await;
        reports.extend(outcomes.into_iter().map(SyncReport::from));

        let summary = BatchSummary::new(reports);
        info!("Backfill finished: {}", summary);
        if let Some(reason) = summary.auth_failure() {
            return Err(Error::Auth(reason.to_string()));
        }
        Ok(summary.reports)
    }

    /// Backfills the configured instruments and resolutions.
    pub async fn run_configured_backfill(&self) -> Result<BatchSummary> {
        let reports = self
            .run_backfill_batch(&self.config.instruments, &self.config.resolutions)
            .await?;
        Ok(BatchSummary::new(reports))
    }

    pub fn start_realtime_scheduler(&self, options: RealtimeOptions) -> Result<RealtimeHandle> {
        if options.resolutions.is_empty() {
            return Err(Error::InvalidConfigValue(
                "real-time polling needs at least one intraday resolution".to_string(),
            ));
        }
        if options.instruments.is_empty() {
            return Err(Error::InvalidConfigValue(
                "real-time polling needs at least one instrument".to_string(),
            ));
        }

        let (aggregator, aggregator_task) = spawn_aggregator(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.week_end,
        );
        let scheduler = RealtimeScheduler::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.budget),
            aggregator,
            Normalizer::new(self.config.week_end),
            self.session.clone(),
            Arc::clone(&self.clock),
            options,
            self.config.realtime_concurrency,
            self.config.session_end_policy,
            self.config.flush_on_shutdown,
        );
        Ok(RealtimeHandle::spawn(scheduler, aggregator_task))
    }

    /// Stops the loop and flushes its candles. Returns why the loop ended,
    /// which is `AuthFailed` when it had already stopped on its own.
    pub async fn stop_realtime_scheduler(&self, handle: RealtimeHandle) -> Result<LoopExit> {
        handle.stop().await
    }

    /// Stops the fetch workers after their current jobs.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
