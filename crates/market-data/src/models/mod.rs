//! Market data models.

mod field_map;
mod grant;
mod record;
mod resolution;

pub use field_map::{FieldMap, TimestampFields};
pub use grant::{AccessGrant, DEFAULT_EXPIRES_IN_SECS};
pub use record::ProviderRecord;
pub use resolution::{week_start, ParseResolutionError, Resolution, DEFAULT_WEEK_END};
