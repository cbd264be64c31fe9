//! Trading session calendar.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::SessionConfig;
use crate::errors::{Error, Result};

/// A weekly trading window in the exchange's local time.
///
/// Holidays are not modelled; a tick on an exchange holiday simply finds no
/// new samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradingSession {
    open: NaiveTime,
    close: NaiveTime,
    weekdays: Vec<Weekday>,
    timezone: Tz,
}

impl TradingSession {
    pub fn new(open: NaiveTime, close: NaiveTime, weekdays: Vec<Weekday>, timezone: Tz) -> Self {
        Self {
            open,
            close,
            weekdays,
            timezone,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let open = parse_time(&config.open)?;
        let close = parse_time(&config.close)?;
        if close <= open {
            return Err(Error::InvalidConfigValue(format!(
                "session close {} must be after open {}",
                config.close, config.open
            )));
        }
        let timezone: Tz = config.timezone.parse().map_err(|e| {
            Error::InvalidConfigValue(format!("unknown timezone '{}': {}", config.timezone, e))
        })?;
        Ok(Self::new(open, close, config.weekdays.clone(), timezone))
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Whether `at` falls on a trading weekday between open and close
    /// (both inclusive), in local time.
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);
        if !self.weekdays.contains(&local.weekday()) {
            return false;
        }
        let time = local.time();
        time >= self.open && time <= self.close
    }

    /// Local calendar date at `at`.
    pub fn trading_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| Error::InvalidConfigValue(format!("invalid session time '{}': {}", raw, e)))
}
