//! Sync configuration.
//!
//! `SyncConfig` is plain data: it deserializes from camelCase JSON with every
//! field optional, and [`SyncConfig::validate`] rejects values the pipeline
//! cannot run with.

use std::time::Duration;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use barsync_market_data::Resolution;

use crate::errors::{Error, Result};
use crate::session::TradingSession;

/// Where an incremental sync starts when data already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackfillDirection {
    /// Fetch only the tail after the latest stored period.
    #[default]
    Forward,
    /// Re-fetch everything from the earliest stored period.
    Reconcile,
}

/// What happens to open candles when the trading session ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionEndPolicy {
    /// Leave candles open; the next session's first sample closes them.
    #[default]
    KeepOpen,
    /// Flush every open candle once the session is observed to close.
    FlushAtClose,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub rate_limit_cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 8_000,
            rate_limit_cooldown_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Local opening time, `HH:MM`.
    pub open: String,
    /// Local closing time, `HH:MM`, inclusive.
    pub close: String,
    pub weekdays: Vec<Weekday>,
    /// IANA timezone name.
    pub timezone: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open: "09:00".to_string(),
            close: "15:30".to_string(),
            weekdays: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            timezone: "Asia/Seoul".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub instruments: Vec<String>,
    pub resolutions: Vec<Resolution>,
    pub daily_call_budget: u32,
    pub worker_count: usize,
    pub min_call_delay_ms: u64,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub history_horizon_days: i64,
    pub intraday_horizon_days: i64,
    pub token_safety_margin_secs: i64,
    pub backfill_direction: BackfillDirection,
    /// Stored periods re-fetched at the start of a forward sync.
    pub overlap_periods: u32,
    pub week_end: Weekday,
    pub upsert_chunk_size: usize,
    /// Pages one backfill task may request from a paged provider.
    pub max_history_pages: u32,
    /// Instruments fetched concurrently within one real-time tick.
    pub realtime_concurrency: usize,
    pub session_end_policy: SessionEndPolicy,
    pub flush_on_shutdown: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            resolutions: vec![Resolution::Daily, Resolution::Weekly, Resolution::Monthly],
            daily_call_budget: 1_000,
            worker_count: 4,
            min_call_delay_ms: 100,
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
            history_horizon_days: 3_650,
            intraday_horizon_days: 30,
            token_safety_margin_secs: 3_600,
            backfill_direction: BackfillDirection::Forward,
            overlap_periods: 0,
            week_end: Weekday::Fri,
            upsert_chunk_size: 1_000,
            max_history_pages: 100,
            realtime_concurrency: 4,
            session_end_policy: SessionEndPolicy::KeepOpen,
            flush_on_shutdown: true,
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidConfigValue(format!("Malformed sync config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolutions.is_empty() {
            return Err(Error::InvalidConfigValue(
                "at least one resolution is required".to_string(),
            ));
        }
        if self.daily_call_budget == 0 {
            return Err(Error::InvalidConfigValue(
                "dailyCallBudget must be positive".to_string(),
            ));
        }
        if self.worker_count == 0 || self.realtime_concurrency == 0 {
            return Err(Error::InvalidConfigValue(
                "workerCount and realtimeConcurrency must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfigValue(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(Error::InvalidConfigValue(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.history_horizon_days <= 0 || self.intraday_horizon_days <= 0 {
            return Err(Error::InvalidConfigValue(
                "history horizons must be positive".to_string(),
            ));
        }
        if self.token_safety_margin_secs < 0 {
            return Err(Error::InvalidConfigValue(
                "tokenSafetyMarginSecs must not be negative".to_string(),
            ));
        }
        if self.upsert_chunk_size == 0 {
            return Err(Error::InvalidConfigValue(
                "upsertChunkSize must be positive".to_string(),
            ));
        }
        if self.max_history_pages == 0 {
            return Err(Error::InvalidConfigValue(
                "maxHistoryPages must be positive".to_string(),
            ));
        }
        TradingSession::from_config(&self.session)?;
        Ok(())
    }

    pub fn min_call_delay(&self) -> Duration {
        Duration::from_millis(self.min_call_delay_ms)
    }

    pub fn token_safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_safety_margin_secs)
    }

    /// Cold-start lookback for a resolution.
    pub fn horizon_for(&self, resolution: Resolution) -> chrono::Duration {
        if resolution.is_intraday() {
            chrono::Duration::days(self.intraday_horizon_days)
        } else {
            chrono::Duration::days(self.history_horizon_days)
        }
    }

    /// Intraday resolutions the real-time loop should drive.
    pub fn realtime_resolutions(&self) -> Vec<Resolution> {
        self.resolutions
            .iter()
            .copied()
            .filter(Resolution::is_intraday)
            .collect()
    }
}
