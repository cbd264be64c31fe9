use async_trait::async_trait;
use chrono::{DateTime, Utc};

use barsync_market_data::Resolution;

use super::model::{PriceBar, UpsertSummary};
use crate::errors::Result;

// =============================================================================
// BarStore - persistence gateway for price bars
// =============================================================================

/// Storage seam for price bars.
///
/// Implementations must upsert on (instrument, resolution, period_start):
/// an existing row has its OHLCV overwritten and its update timestamp bumped.
/// Writes are async because they go through a serialized writer; reads are
/// sync and served from a connection pool.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Writes `bars` as a single unit of work. Either every row lands or
    /// none does.
    async fn upsert_batch(&self, bars: &[PriceBar]) -> Result<UpsertSummary>;

    /// Writes one bar. Returns `true` when a new row was inserted and `false`
    /// when an existing row was overwritten.
    async fn upsert_one(&self, bar: &PriceBar) -> Result<bool>;

    /// Earliest and latest stored period starts for a series.
    fn bounds(
        &self,
        instrument: &str,
        resolution: Resolution,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>>;

    /// Stored bars with `start <= period_start <= end`, ascending.
    fn range(
        &self,
        instrument: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>>;

    /// Cheap reachability check used at startup.
    fn ping(&self) -> Result<()>;
}
