use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{max, min};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel::upsert::excluded;
use log::debug;

use barsync_core::bars::{BarStore, PriceBar, UpsertSummary};
use barsync_core::Result;
use barsync_market_data::Resolution;

use super::model::PriceBarDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use crate::schema::price_bars;
use crate::schema::price_bars::dsl as bars_dsl;
use crate::utils::{chunk_for_sqlite, decode_timestamp, encode_timestamp};

/// Rows handled per pass of the batch upsert.
pub const DEFAULT_UPSERT_CHUNK: usize = 1_000;

type RowKey = (String, String, String);

fn row_key(row: &PriceBarDB) -> RowKey {
    (
        row.instrument.clone(),
        row.resolution.clone(),
        row.period_start.clone(),
    )
}

pub struct SqliteBarStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    chunk_size: usize,
}

impl SqliteBarStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self {
            pool,
            writer,
            chunk_size: DEFAULT_UPSERT_CHUNK,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// Keys among `rows` that are already stored.
fn existing_keys(conn: &mut SqliteConnection, rows: &[PriceBarDB]) -> Result<HashSet<RowKey>> {
    let mut by_series: BTreeMap<(&str, &str), Vec<&str>> = BTreeMap::new();
    for row in rows {
        by_series
            .entry((row.instrument.as_str(), row.resolution.as_str()))
            .or_default()
            .push(row.period_start.as_str());
    }

    let mut found = HashSet::new();
    for ((instrument, resolution), starts) in by_series {
        for chunk in chunk_for_sqlite(&starts) {
            let stored: Vec<String> = bars_dsl::price_bars
                .filter(bars_dsl::instrument.eq(instrument))
                .filter(bars_dsl::resolution.eq(resolution))
                .filter(bars_dsl::period_start.eq_any(chunk.to_vec()))
                .select(bars_dsl::period_start)
                .load(conn)
                .into_core()?;
            found.extend(
                stored
                    .into_iter()
                    .map(|start| (instrument.to_string(), resolution.to_string(), start)),
            );
        }
    }
    Ok(found)
}

/// Inserts `row`, or overwrites OHLCV and `updated_at` of the stored row with
/// the same key. `created_at` is left untouched on conflict.
fn upsert_row(conn: &mut SqliteConnection, row: &PriceBarDB) -> Result<()> {
    diesel::insert_into(price_bars::table)
        .values(row)
        .on_conflict((
            bars_dsl::instrument,
            bars_dsl::resolution,
            bars_dsl::period_start,
        ))
        .do_update()
        .set((
            bars_dsl::open.eq(excluded(bars_dsl::open)),
            bars_dsl::high.eq(excluded(bars_dsl::high)),
            bars_dsl::low.eq(excluded(bars_dsl::low)),
            bars_dsl::close.eq(excluded(bars_dsl::close)),
            bars_dsl::volume.eq(excluded(bars_dsl::volume)),
            bars_dsl::updated_at.eq(excluded(bars_dsl::updated_at)),
        ))
        .execute(conn)
        .into_core()?;
    Ok(())
}

fn decode_rows(rows: Vec<PriceBarDB>) -> Result<Vec<PriceBar>> {
    rows.into_iter()
        .map(|row| PriceBar::try_from(row).map_err(Into::into))
        .collect()
}

#[async_trait]
impl BarStore for SqliteBarStore {
    async fn upsert_batch(&self, bars: &[PriceBar]) -> Result<UpsertSummary> {
        if bars.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let now = Utc::now();
        let rows: Vec<PriceBarDB> = bars.iter().map(|b| PriceBarDB::from_bar(b, now)).collect();
        let chunk_size = self.chunk_size;

        let summary = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<UpsertSummary> {
                let mut summary = UpsertSummary::default();
                for chunk in rows.chunks(chunk_size) {
                    let mut stored = existing_keys(conn, chunk)?;
                    for row in chunk {
                        upsert_row(conn, row)?;
                        if stored.insert(row_key(row)) {
                            summary.inserted += 1;
                        } else {
                            summary.updated += 1;
                        }
                    }
                }
                Ok(summary)
            })
            .await?;

        debug!(
            "Upserted {} bars ({} inserted, {} updated)",
            summary.total(),
            summary.inserted,
            summary.updated
        );
        Ok(summary)
    }

    async fn upsert_one(&self, bar: &PriceBar) -> Result<bool> {
        let row = PriceBarDB::from_bar(bar, Utc::now());

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let existed = bars_dsl::price_bars
                    .find((&row.instrument, &row.resolution, &row.period_start))
                    .select(bars_dsl::period_start)
                    .first::<String>(conn)
                    .optional()
                    .into_core()?
                    .is_some();
                upsert_row(conn, &row)?;
                Ok(!existed)
            })
            .await
    }

    fn bounds(
        &self,
        instrument: &str,
        resolution: Resolution,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let mut conn = get_connection(&self.pool)?;

        let (first, last) = bars_dsl::price_bars
            .filter(bars_dsl::instrument.eq(instrument))
            .filter(bars_dsl::resolution.eq(resolution.as_str()))
            .select((min(bars_dsl::period_start), max(bars_dsl::period_start)))
            .first::<(Option<String>, Option<String>)>(&mut conn)
            .into_core()?;

        match (first, last) {
            (Some(first), Some(last)) => Ok(Some((
                decode_timestamp(&first)?,
                decode_timestamp(&last)?,
            ))),
            _ => Ok(None),
        }
    }

    fn range(
        &self,
        instrument: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>> {
        let mut conn = get_connection(&self.pool)?;

        let rows = bars_dsl::price_bars
            .filter(bars_dsl::instrument.eq(instrument))
            .filter(bars_dsl::resolution.eq(resolution.as_str()))
            .filter(bars_dsl::period_start.ge(encode_timestamp(start)))
            .filter(bars_dsl::period_start.le(encode_timestamp(end)))
            .order(bars_dsl::period_start.asc())
            .select(PriceBarDB::as_select())
            .load::<PriceBarDB>(&mut conn)
            .into_core()?;

        decode_rows(rows)
    }

    fn ping(&self) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .map_err(StorageError::from)?;
        Ok(())
    }
}
