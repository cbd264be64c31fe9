//! Hand-written fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use barsync_core::bars::{BarKey, BarStore, PriceBar, UpsertSummary};
use barsync_core::clock::Sleeper;
use barsync_core::credentials::{Token, TokenStore};
use barsync_core::errors::{DatabaseError, Error, Result};
use barsync_market_data::{
    AccessGrant, FieldMap, MarketDataError, MarketDataProvider, ProviderCapabilities,
    ProviderRecord, Resolution, TimestampFields,
};

// =========================================================================
// Fake provider
// =========================================================================

#[derive(Clone, Default)]
pub struct FakeProvider {
    /// Scripted authentication results; empty means "grant a fresh token".
    pub auth_script: Arc<Mutex<VecDeque<std::result::Result<AccessGrant, MarketDataError>>>>,
    /// Errors returned by data calls before any data is served.
    pub call_errors: Arc<Mutex<VecDeque<MarketDataError>>>,
    pub history: Arc<Mutex<HashMap<(String, Resolution), Vec<ProviderRecord>>>>,
    /// Successive `fetch_recent` responses; the last one repeats.
    pub recent: Arc<Mutex<VecDeque<Vec<ProviderRecord>>>>,
    pub auth_calls: Arc<AtomicUsize>,
    pub history_calls: Arc<AtomicUsize>,
    pub recent_calls: Arc<AtomicUsize>,
    pub tokens_seen: Arc<Mutex<Vec<String>>>,
    pub auth_delay: Option<Duration>,
    pub expires_in: u64,
    /// Serve history in pages of this many rows, newest first.
    pub page_rows: Option<usize>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            expires_in: 86_400,
            ..Default::default()
        }
    }

    pub fn with_auth_delay(mut self, delay: Duration) -> Self {
        self.auth_delay = Some(delay);
        self
    }

    pub fn with_page_rows(mut self, rows: usize) -> Self {
        self.page_rows = Some(rows);
        self
    }

    pub fn set_history(&self, symbol: &str, resolution: Resolution, records: Vec<ProviderRecord>) {
        self.history
            .lock()
            .unwrap()
            .insert((symbol.to_string(), resolution), records);
    }

    pub fn push_recent(&self, records: Vec<ProviderRecord>) {
        self.recent.lock().unwrap().push_back(records);
    }

    pub fn push_call_error(&self, error: MarketDataError) {
        self.call_errors.lock().unwrap().push_back(error);
    }

    pub fn push_auth(&self, result: std::result::Result<AccessGrant, MarketDataError>) {
        self.auth_script.lock().unwrap().push_back(result);
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn recent_calls(&self) -> usize {
        self.recent_calls.load(Ordering::SeqCst)
    }

    fn next_call_error(&self) -> Option<MarketDataError> {
        self.call_errors.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl MarketDataProvider for FakeProvider {
    fn id(&self) -> &'static str {
        "FAKE"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            resolutions: &[
                Resolution::OneMinute,
                Resolution::FiveMinutes,
                Resolution::FifteenMinutes,
                Resolution::Daily,
                Resolution::Monthly,
            ],
            max_intraday_days: 30,
        }
    }

    fn history_page_rows(&self, _resolution: Resolution) -> Option<usize> {
        self.page_rows
    }

    fn field_map(&self, resolution: Resolution) -> FieldMap {
        let timestamp = if resolution.is_intraday() {
            TimestampFields::DateTime {
                date_field: "date",
                date_format: "%Y%m%d",
                time_field: "time",
                time_format: "%H%M%S",
            }
        } else {
            TimestampFields::Date {
                field: "date",
                format: "%Y%m%d",
            }
        };
        FieldMap {
            timestamp,
            open: "open",
            high: "high",
            low: "low",
            close: "close",
            volume: "volume",
            utc_offset: FixedOffset::east_opt(0).unwrap(),
        }
    }

    async fn authenticate(&self) -> std::result::Result<AccessGrant, MarketDataError> {
        let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.auth_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(scripted) = self.auth_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(AccessGrant {
            access_token: format!("token-{}", n),
            expires_in: self.expires_in,
            token_type: Some("Bearer".to_string()),
        })
    }

    async fn fetch_history(
        &self,
        access_token: &str,
        symbol: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> std::result::Result<Vec<ProviderRecord>, MarketDataError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().unwrap().push(access_token.to_string());
        if let Some(error) = self.next_call_error() {
            return Err(error);
        }
        let start_day = start.format("%Y%m%d").to_string();
        let end_day = end.format("%Y%m%d").to_string();
        let mut rows: Vec<ProviderRecord> = self
            .history
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), resolution))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| {
                r.get("date")
                    .map(|d| d >= start_day.as_str() && d <= end_day.as_str())
                    .unwrap_or(true)
            })
            .collect();
        if let Some(page) = self.page_rows {
            rows = rows.split_off(rows.len().saturating_sub(page));
        }
        Ok(rows)
    }

    async fn fetch_recent(
        &self,
        access_token: &str,
        _symbol: &str,
        _resolution: Resolution,
    ) -> std::result::Result<Vec<ProviderRecord>, MarketDataError> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().unwrap().push(access_token.to_string());
        if let Some(error) = self.next_call_error() {
            return Err(error);
        }
        let mut recent = self.recent.lock().unwrap();
        if recent.len() > 1 {
            Ok(recent.pop_front().unwrap_or_default())
        } else {
            Ok(recent.front().cloned().unwrap_or_default())
        }
    }
}

pub fn daily_record(date: &str, o: &str, h: &str, l: &str, c: &str, v: &str) -> ProviderRecord {
    ProviderRecord::new()
        .with("date", date)
        .with("open", o)
        .with("high", h)
        .with("low", l)
        .with("close", c)
        .with("volume", v)
}

pub fn tick_record(date: &str, time: &str, price: &str, volume: &str) -> ProviderRecord {
    ProviderRecord::new()
        .with("date", date)
        .with("time", time)
        .with("open", price)
        .with("high", price)
        .with("low", price)
        .with("close", price)
        .with("volume", volume)
}

// =========================================================================
// In-memory bar store
// =========================================================================

#[derive(Clone, Default)]
pub struct InMemoryBarStore {
    pub bars: Arc<Mutex<BTreeMap<BarKey, PriceBar>>>,
    pub fail_writes: Arc<Mutex<bool>>,
    pub batch_writes: Arc<AtomicUsize>,
    pub single_writes: Arc<AtomicUsize>,
}

impl InMemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    pub fn insert(&self, bar: PriceBar) {
        self.bars.lock().unwrap().insert(bar.key(), bar);
    }

    pub fn series(&self, instrument: &str, resolution: Resolution) -> Vec<PriceBar> {
        self.bars
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.instrument == instrument && b.resolution == resolution)
            .cloned()
            .collect()
    }

    fn check_writable(&self) -> Result<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "Intentional write failure".into(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BarStore for InMemoryBarStore {
    async fn upsert_batch(&self, bars: &[PriceBar]) -> Result<UpsertSummary> {
        self.check_writable()?;
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.bars.lock().unwrap();
        let mut summary = UpsertSummary::default();
        for bar in bars {
            if stored.insert(bar.key(), bar.clone()).is_some() {
                summary.updated += 1;
            } else {
                summary.inserted += 1;
            }
        }
        Ok(summary)
    }

    async fn upsert_one(&self, bar: &PriceBar) -> Result<bool> {
        self.check_writable()?;
        self.single_writes.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .bars
            .lock()
            .unwrap()
            .insert(bar.key(), bar.clone())
            .is_none())
    }

    fn bounds(
        &self,
        instrument: &str,
        resolution: Resolution,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let series = self.series(instrument, resolution);
        Ok(series
            .first()
            .zip(series.last())
            .map(|(first, last)| (first.period_start, last.period_start)))
    }

    fn range(
        &self,
        instrument: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>> {
        Ok(self
            .series(instrument, resolution)
            .into_iter()
            .filter(|b| b.period_start >= start && b.period_start <= end)
            .collect())
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// =========================================================================
// Token store and sleeper
// =========================================================================

#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    pub token: Arc<Mutex<Option<Token>>>,
    pub saves: Arc<AtomicUsize>,
}

impl MemoryTokenStore {
    pub fn with_token(token: Token) -> Self {
        Self {
            token: Arc::new(Mutex::new(Some(token))),
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<Token>> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn save(&self, token: &Token) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.token.lock().unwrap() = Some(token.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}
