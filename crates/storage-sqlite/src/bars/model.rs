//! Database model for price bars.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use barsync_core::bars::PriceBar;
use barsync_market_data::Resolution;

use crate::errors::StorageError;
use crate::utils::{decode_timestamp, encode_timestamp};

/// One row of `price_bars`. Prices and volume are stored as text to keep
/// decimals exact.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::price_bars)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PriceBarDB {
    pub instrument: String,
    pub resolution: String,
    pub period_start: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub created_at: String,
    pub updated_at: String,
}

impl PriceBarDB {
    pub fn from_bar(bar: &PriceBar, written_at: DateTime<Utc>) -> Self {
        let written_at = encode_timestamp(written_at);
        Self {
            instrument: bar.instrument.clone(),
            resolution: bar.resolution.as_str().to_string(),
            period_start: encode_timestamp(bar.period_start),
            open: bar.open.to_string(),
            high: bar.high.to_string(),
            low: bar.low.to_string(),
            close: bar.close.to_string(),
            volume: bar.volume.to_string(),
            created_at: written_at.clone(),
            updated_at: written_at,
        }
    }
}

fn decimal(column: &str, raw: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(raw)
        .map_err(|e| StorageError::CorruptRow(format!("{} '{}': {}", column, raw, e)))
}

impl TryFrom<PriceBarDB> for PriceBar {
    type Error = StorageError;

    fn try_from(db: PriceBarDB) -> Result<Self, Self::Error> {
        let resolution = Resolution::from_str(&db.resolution)
            .map_err(|e| StorageError::CorruptRow(e.to_string()))?;
        let volume = db
            .volume
            .parse::<u64>()
            .map_err(|e| StorageError::CorruptRow(format!("volume '{}': {}", db.volume, e)))?;

        Ok(PriceBar {
            period_start: decode_timestamp(&db.period_start)?,
            open: decimal("open", &db.open)?,
            high: decimal("high", &db.high)?,
            low: decimal("low", &db.low)?,
            close: decimal("close", &db.close)?,
            volume,
            resolution,
            instrument: db.instrument,
        })
    }
}
