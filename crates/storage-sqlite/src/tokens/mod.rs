//! SQLite storage for provider access tokens.

mod model;
mod repository;

pub use model::ProviderTokenDB;
pub use repository::SqliteTokenStore;
