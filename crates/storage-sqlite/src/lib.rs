//! SQLite storage for barsync.
//!
//! Implements the persistence seams of `barsync-core` with Diesel:
//! - [`SqliteBarStore`] for [`barsync_core::bars::BarStore`]
//! - [`SqliteTokenStore`] for [`barsync_core::credentials::TokenStore`]
//!
//! Reads go through an r2d2 pool. Every write is funnelled through a single
//! writer task ([`WriteHandle`]) that owns one connection and runs each job in
//! an immediate transaction.
//!
//! ```text
//! core (BarStore, TokenStore)
//!            │
//!            ▼
//!   storage-sqlite (this crate)
//!            │
//!            ▼
//!        SQLite DB (WAL)
//! ```

pub mod bars;
pub mod db;
pub mod errors;
pub mod schema;
pub mod tokens;
pub mod utils;

pub use bars::SqliteBarStore;
pub use db::{
    create_pool, get_connection, init, open, run_migrations, spawn_writer, DbConnection, DbPool,
    WriteHandle,
};
pub use errors::{IntoCore, StorageError};
pub use tokens::SqliteTokenStore;
