use chrono::FixedOffset;

/// Where a record's timestamp lives and how to read it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimestampFields {
    /// Calendar date only (daily, weekly and monthly rows).
    Date {
        field: &'static str,
        format: &'static str,
    },
    /// Separate date and time-of-day fields in the provider's local time.
    DateTime {
        date_field: &'static str,
        date_format: &'static str,
        time_field: &'static str,
        time_format: &'static str,
    },
}

/// Maps a provider's field labels onto the canonical OHLCV columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMap {
    pub timestamp: TimestampFields,
    pub open: &'static str,
    pub high: &'static str,
    pub low: &'static str,
    pub close: &'static str,
    pub volume: &'static str,
    /// Offset of the provider's local clock, applied to `DateTime` stamps.
    pub utc_offset: FixedOffset,
}
