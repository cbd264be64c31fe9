use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use barsync_market_data::{FieldMap, ProviderRecord, Resolution, TimestampFields};

use crate::bars::{BarViolation, PriceBar};

/// Why a provider row was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a valid number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invariant violated: {0}")]
    Invariant(#[from] BarViolation),
}

/// A validated provider row, not yet aligned to a period boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub instrument: String,
    pub resolution: Resolution,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

impl Sample {
    /// The bar this sample describes, with `period_start` floored to its
    /// resolution.
    pub fn into_bar(self, week_end: Weekday) -> PriceBar {
        let period_start = self.resolution.floor_anchored(self.timestamp, week_end);
        PriceBar {
            instrument: self.instrument,
            resolution: self.resolution,
            period_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Result of normalizing one provider response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    /// Aligned bars, ascending by `period_start`, one per period.
    pub bars: Vec<PriceBar>,
    /// Rows dropped as malformed.
    pub malformed: usize,
}

/// Turns provider-labelled rows into canonical bars.
#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
    week_end: Weekday,
}

impl Normalizer {
    pub fn new(week_end: Weekday) -> Self {
        Self { week_end }
    }

    pub fn week_end(&self) -> Weekday {
        self.week_end
    }

    /// Parses and validates one row.
    pub fn parse_record(
        &self,
        instrument: &str,
        resolution: Resolution,
        map: &FieldMap,
        record: &ProviderRecord,
    ) -> Result<Sample, MalformedRecord> {
        let timestamp = parse_timestamp(map, record)?;
        let sample = Sample {
            instrument: instrument.to_string(),
            resolution,
            timestamp,
            open: decimal_field(record, map.open)?,
            high: decimal_field(record, map.high)?,
            low: decimal_field(record, map.low)?,
            close: decimal_field(record, map.close)?,
            volume: volume_field(record, map.volume)?,
        };

        sample.clone().into_bar(self.week_end).validate()?;
        Ok(sample)
    }

    /// Normalizes a backfill response: drops malformed rows, aligns the rest,
    /// keeps the last row for any repeated period and sorts ascending.
    pub fn normalize(
        &self,
        instrument: &str,
        resolution: Resolution,
        map: &FieldMap,
        records: &[ProviderRecord],
    ) -> NormalizedBatch {
        let (samples, malformed) = self.samples(instrument, resolution, map, records);

        let mut by_period: BTreeMap<DateTime<Utc>, PriceBar> = BTreeMap::new();
        for sample in samples {
            let bar = sample.into_bar(self.week_end);
            by_period.insert(bar.period_start, bar);
        }

        NormalizedBatch {
            bars: by_period.into_values().collect(),
            malformed,
        }
    }

    /// Parses rows into samples sorted by timestamp, without aligning them.
    /// Returns the samples and the number of rows dropped.
    pub fn samples(
        &self,
        instrument: &str,
        resolution: Resolution,
        map: &FieldMap,
        records: &[ProviderRecord],
    ) -> (Vec<Sample>, usize) {
        let mut malformed = 0;
        let mut samples = Vec::with_capacity(records.len());
        for record in records {
            match self.parse_record(instrument, resolution, map, record) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    malformed += 1;
                    debug!(
                        "Dropped malformed {} record for {}: {}",
                        resolution, instrument, e
                    );
                }
            }
        }
        samples.sort_by_key(|s| s.timestamp);
        (samples, malformed)
    }
}

fn required<'a>(
    record: &'a ProviderRecord,
    field: &'static str,
) -> Result<&'a str, MalformedRecord> {
    record.get(field).ok_or(MalformedRecord::MissingField(field))
}

fn decimal_field(record: &ProviderRecord, field: &'static str) -> Result<Decimal, MalformedRecord> {
    let raw = required(record, field)?;
    Decimal::from_str(raw).map_err(|_| MalformedRecord::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

fn volume_field(record: &ProviderRecord, field: &'static str) -> Result<u64, MalformedRecord> {
    let raw = required(record, field)?;
    let invalid = || MalformedRecord::InvalidNumber {
        field,
        value: raw.to_string(),
    };
    if let Ok(volume) = raw.parse::<u64>() {
        return Ok(volume);
    }
    // Some feeds render integral volumes as "1234.0".
    let decimal = Decimal::from_str(raw).map_err(|_| invalid())?;
    if decimal.fract().is_zero() {
        decimal.to_u64().ok_or_else(invalid)
    } else {
        Err(invalid())
    }
}

fn parse_timestamp(
    map: &FieldMap,
    record: &ProviderRecord,
) -> Result<DateTime<Utc>, MalformedRecord> {
    match &map.timestamp {
        TimestampFields::Date { field, format } => {
            let raw = required(record, *field)?;
            let date = NaiveDate::parse_from_str(raw, format)
                .map_err(|e| MalformedRecord::InvalidTimestamp(format!("'{}': {}", raw, e)))?;
            Ok(date.and_time(NaiveTime::MIN).and_utc())
        }
        TimestampFields::DateTime {
            date_field,
            date_format,
            time_field,
            time_format,
        } => {
            let raw_date = required(record, *date_field)?;
            let raw_time = required(record, *time_field)?;
            let date = NaiveDate::parse_from_str(raw_date, date_format)
                .map_err(|e| MalformedRecord::InvalidTimestamp(format!("'{}': {}", raw_date, e)))?;
            let time = NaiveTime::parse_from_str(raw_time, time_format)
                .map_err(|e| MalformedRecord::InvalidTimestamp(format!("'{}': {}", raw_time, e)))?;
            map.utc_offset
                .from_local_datetime(&date.and_time(time))
                .single()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| {
                    MalformedRecord::InvalidTimestamp(format!("{} {}", raw_date, raw_time))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use rust_decimal_macros::dec;

    fn daily_map() -> FieldMap {
        FieldMap {
            timestamp: TimestampFields::Date {
                field: "stck_bsop_date",
                format: "%Y%m%d",
            },
            open: "stck_oprc",
            high: "stck_hgpr",
            low: "stck_lwpr",
            close: "stck_clpr",
            volume: "acml_vol",
            utc_offset: FixedOffset::east_opt(9 * 3600).unwrap(),
        }
    }

    fn minute_map() -> FieldMap {
        FieldMap {
            timestamp: TimestampFields::DateTime {
                date_field: "stck_bsop_date",
                date_format: "%Y%m%d",
                time_field: "stck_cntg_hour",
                time_format: "%H%M%S",
            },
            open: "stck_oprc",
            high: "stck_hgpr",
            low: "stck_lwpr",
            close: "stck_prpr",
            volume: "cntg_vol",
            utc_offset: FixedOffset::east_opt(9 * 3600).unwrap(),
        }
    }

    fn daily(date: &str, o: &str, h: &str, l: &str, c: &str, v: &str) -> ProviderRecord {
        ProviderRecord::new()
            .with("stck_bsop_date", date)
            .with("stck_oprc", o)
            .with("stck_hgpr", h)
            .with("stck_lwpr", l)
            .with("stck_clpr", c)
            .with("acml_vol", v)
    }

    #[test]
    fn test_normalizes_and_sorts_ascending() {
        let normalizer = Normalizer::new(Weekday::Fri);
        let records = vec![
            daily("20240103", "72000", "73000", "71500", "72500", "1000"),
            daily("20240102", "71000", "72100", "70900", "72000", "2000"),
        ];

        let batch = normalizer.normalize("005930", Resolution::Daily, &daily_map(), &records);
        assert_eq!(batch.malformed, 0);
        assert_eq!(batch.bars.len(), 2);
        assert_eq!(batch.bars[0].period_start.date_naive().to_string(), "2024-01-02");
        assert_eq!(batch.bars[0].close, dec!(72000));
        assert_eq!(batch.bars[1].volume, 1000);
    }

    #[test]
    fn test_drops_and_counts_malformed_rows() {
        let normalizer = Normalizer::new(Weekday::Fri);
        let records = vec![
            daily("20240102", "71000", "72100", "70900", "72000", "2000"),
            // missing close
            daily("20240103", "71000", "72100", "70900", "", "2000"),
            // not a number
            daily("20240104", "abc", "72100", "70900", "72000", "2000"),
            // high below close
            daily("20240105", "71000", "71500", "70900", "72000", "2000"),
            // bad date
            daily("2024-01-08", "71000", "72100", "70900", "72000", "2000"),
            // fractional volume
            daily("20240109", "71000", "72100", "70900", "72000", "10.5"),
        ];

        let batch = normalizer.normalize("005930", Resolution::Daily, &daily_map(), &records);
        assert_eq!(batch.bars.len(), 1);
        assert_eq!(batch.malformed, 5);
    }

    #[test]
    fn test_integral_decimal_volume_is_accepted() {
        let normalizer = Normalizer::new(Weekday::Fri);
        let records = vec![daily("20240102", "10", "12", "9", "11", "1234.0")];
        let batch = normalizer.normalize("005930", Resolution::Daily, &daily_map(), &records);
        assert_eq!(batch.bars[0].volume, 1234);
    }

    #[test]
    fn test_duplicate_period_keeps_last_row() {
        let normalizer = Normalizer::new(Weekday::Fri);
        let records = vec![
            daily("20240102", "10", "12", "9", "11", "100"),
            daily("20240102", "10", "13", "9", "12", "150"),
        ];
        let batch = normalizer.normalize("005930", Resolution::Daily, &daily_map(), &records);
        assert_eq!(batch.bars.len(), 1);
        assert_eq!(batch.bars[0].close, dec!(12));
        assert_eq!(batch.bars[0].volume, 150);
    }

    #[test]
    fn test_monthly_rows_align_to_month_start() {
        let normalizer = Normalizer::new(Weekday::Fri);
        let records = vec![daily("20240131", "10", "12", "9", "11", "100")];
        let batch = normalizer.normalize("005930", Resolution::Monthly, &daily_map(), &records);
        assert_eq!(batch.bars[0].period_start.date_naive().to_string(), "2024-01-01");
    }

    #[test]
    fn test_intraday_local_time_converted_to_utc() {
        let normalizer = Normalizer::new(Weekday::Fri);
        let record = ProviderRecord::new()
            .with("stck_bsop_date", "20240102")
            .with("stck_cntg_hour", "100740")
            .with("stck_oprc", "100")
            .with("stck_hgpr", "101")
            .with("stck_lwpr", "99")
            .with("stck_prpr", "100.5")
            .with("cntg_vol", "42");

        let (samples, malformed) =
            normalizer.samples("005930", Resolution::FiveMinutes, &minute_map(), &[record]);
        assert_eq!(malformed, 0);
        // 10:07:40 KST is 01:07:40 UTC.
        assert_eq!(samples[0].timestamp.to_rfc3339(), "2024-01-02T01:07:40+00:00");

        let bar = samples[0].clone().into_bar(Weekday::Fri);
        assert_eq!(bar.period_start.to_rfc3339(), "2024-01-02T01:05:00+00:00");
    }
}
