use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Week-ending weekday used when no explicit anchor is configured.
pub const DEFAULT_WEEK_END: Weekday = Weekday::Fri;

/// Bar period.
///
/// Daily, weekly and monthly period starts carry date semantics: they are
/// midnight UTC of the calendar date they describe. Intraday period starts
/// are real UTC instants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "MINUTE_1")]
    OneMinute,
    #[serde(rename = "MINUTE_5")]
    FiveMinutes,
    #[serde(rename = "MINUTE_15")]
    FifteenMinutes,
    #[serde(rename = "DAILY")]
    Daily,
    #[serde(rename = "WEEKLY")]
    Weekly,
    #[serde(rename = "MONTHLY")]
    Monthly,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown resolution: {0}")]
pub struct ParseResolutionError(pub String);

impl Resolution {
    pub const ALL: [Resolution; 6] = [
        Resolution::OneMinute,
        Resolution::FiveMinutes,
        Resolution::FifteenMinutes,
        Resolution::Daily,
        Resolution::Weekly,
        Resolution::Monthly,
    ];

    pub const INTRADAY: [Resolution; 3] = [
        Resolution::OneMinute,
        Resolution::FiveMinutes,
        Resolution::FifteenMinutes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::OneMinute => "MINUTE_1",
            Resolution::FiveMinutes => "MINUTE_5",
            Resolution::FifteenMinutes => "MINUTE_15",
            Resolution::Daily => "DAILY",
            Resolution::Weekly => "WEEKLY",
            Resolution::Monthly => "MONTHLY",
        }
    }

    pub fn is_intraday(&self) -> bool {
        self.minutes().is_some()
    }

    /// Length in minutes for intraday resolutions.
    pub fn minutes(&self) -> Option<u32> {
        match self {
            Resolution::OneMinute => Some(1),
            Resolution::FiveMinutes => Some(5),
            Resolution::FifteenMinutes => Some(15),
            _ => None,
        }
    }

    /// Floors `ts` to the start of its period, anchoring weeks on
    /// [`DEFAULT_WEEK_END`].
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.floor_anchored(ts, DEFAULT_WEEK_END)
    }

    /// Floors `ts` to the start of its period. Weekly periods start on the
    /// day after `week_end`.
    pub fn floor_anchored(&self, ts: DateTime<Utc>, week_end: Weekday) -> DateTime<Utc> {
        if let Some(minutes) = self.minutes() {
            let length = i64::from(minutes) * 60;
            let secs = ts.timestamp();
            let floored = secs - secs.rem_euclid(length);
            return DateTime::from_timestamp(floored, 0).unwrap_or(ts);
        }

        let date = ts.date_naive();
        match self {
            Resolution::Weekly => midnight(week_start(date, week_end)),
            Resolution::Monthly => {
                midnight(NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date))
            }
            _ => midnight(date),
        }
    }

    /// Moves an aligned period start by `periods` periods (negative steps go
    /// back in time).
    pub fn step(&self, ts: DateTime<Utc>, periods: i32) -> DateTime<Utc> {
        let stepped = match self {
            Resolution::Monthly => {
                let months = Months::new(periods.unsigned_abs());
                if periods >= 0 {
                    ts.checked_add_months(months)
                } else {
                    ts.checked_sub_months(months)
                }
            }
            Resolution::Weekly => ts.checked_add_signed(Duration::days(7 * i64::from(periods))),
            Resolution::Daily => ts.checked_add_signed(Duration::days(i64::from(periods))),
            _ => {
                let minutes = i64::from(self.minutes().unwrap_or(1));
                ts.checked_add_signed(Duration::minutes(minutes * i64::from(periods)))
            }
        };
        stepped.unwrap_or(ts)
    }
}

/// First day of the week containing `date`, for weeks ending on `week_end`.
pub fn week_start(date: NaiveDate, week_end: Weekday) -> NaiveDate {
    let start = week_end.succ();
    let back = (date.weekday().num_days_from_monday() + 7 - start.num_days_from_monday()) % 7;
    date - Duration::days(i64::from(back))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        let parsed = match normalized {
            "1m" => Some(Resolution::OneMinute),
            "5m" => Some(Resolution::FiveMinutes),
            "15m" => Some(Resolution::FifteenMinutes),
            "1d" => Some(Resolution::Daily),
            "1w" => Some(Resolution::Weekly),
            "1mo" => Some(Resolution::Monthly),
            _ => Resolution::ALL
                .into_iter()
                .find(|r| r.as_str().eq_ignore_ascii_case(normalized)),
        };
        parsed.ok_or_else(|| ParseResolutionError(s.to_string()))
    }
}
