use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context};

use barsync_core::config::SyncConfig;
use barsync_market_data::{KisConfig, Resolution};

/// Process configuration assembled from the environment (and `.env`).
#[derive(Debug)]
pub struct Config {
    pub db_path: String,
    pub sync: SyncConfig,
    pub kis: KisConfig,
    /// When set, the access token is kept in this JSON file instead of the
    /// database.
    pub token_file: Option<PathBuf>,
    pub run_backfill: bool,
    pub realtime: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut sync = match var("BARSYNC_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading sync config {}", path))?;
                SyncConfig::from_json_str(&raw)?
            }
            None => SyncConfig::default(),
        };

        if let Some(raw) = var("BARSYNC_INSTRUMENTS") {
            sync.instruments = parse_list(&raw);
        }
        if let Some(raw) = var("BARSYNC_RESOLUTIONS") {
            sync.resolutions = parse_resolutions(&raw)?;
        }
        if let Some(raw) = var("BARSYNC_DAILY_CALL_BUDGET") {
            sync.daily_call_budget = parse_number("BARSYNC_DAILY_CALL_BUDGET", &raw)?;
        }
        if let Some(raw) = var("BARSYNC_WORKERS") {
            sync.worker_count = parse_number("BARSYNC_WORKERS", &raw)?;
        }
        sync.validate()?;

        let app_key = var("KIS_APP_KEY").context("KIS_APP_KEY is not set")?;
        let app_secret = var("KIS_APP_SECRET").context("KIS_APP_SECRET is not set")?;
        let mut kis = KisConfig::new(app_key, app_secret);
        if let Some(base_url) = var("KIS_BASE_URL") {
            kis = kis.with_base_url(base_url);
        }

        Ok(Self {
            db_path: var("BARSYNC_DB_PATH").unwrap_or_else(|| "./data/barsync.db".to_string()),
            token_file: var("BARSYNC_TOKEN_FILE").map(PathBuf::from),
            run_backfill: parse_flag(var("BARSYNC_RUN_BACKFILL").as_deref(), true)?,
            realtime: parse_flag(var("BARSYNC_REALTIME").as_deref(), false)?,
            sync,
            kis,
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_resolutions(raw: &str) -> anyhow::Result<Vec<Resolution>> {
    parse_list(raw)
        .iter()
        .map(|r| Resolution::from_str(r).map_err(|e| anyhow!("BARSYNC_RESOLUTIONS: {}", e)))
        .collect()
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("{} must be a number, got '{}': {}", key, raw, e))
}

fn parse_flag(raw: Option<&str>, default: bool) -> anyhow::Result<bool> {
    match raw.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(anyhow!("expected a boolean, got '{}'", v)),
    }
}
