//! Helpers shared by the repositories.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::StorageError;

/// Maximum number of bound parameters per `IN (...)` list.
///
/// SQLite's compile-time limit is around 999; 500 leaves room for the other
/// parameters of the statement.
pub const SQLITE_MAX_PARAMS_CHUNK: usize = 500;

/// Chunk a slice into pieces of at most [`SQLITE_MAX_PARAMS_CHUNK`] items.
pub fn chunk_for_sqlite<T>(items: &[T]) -> impl Iterator<Item = &[T]> {
    items.chunks(SQLITE_MAX_PARAMS_CHUNK)
}

/// Encodes an instant as fixed-width RFC 3339 (`2024-01-02T10:00:00Z`), so
/// text comparison in SQL matches chronological order.
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRow(format!("bad timestamp '{}': {}", raw, e)))
}
