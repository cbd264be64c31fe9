//! Price bar model and persistence seam.

mod model;
mod store;

pub use model::{group_by_series, BarKey, BarViolation, Instrument, PriceBar, UpsertSummary};
pub use store::BarStore;
