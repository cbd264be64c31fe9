//! SQLite storage for price bars.

mod model;
mod repository;

pub use model::PriceBarDB;
pub use repository::SqliteBarStore;
