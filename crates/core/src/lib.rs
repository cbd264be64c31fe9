//! barsync core - incremental multi-resolution price bar synchronization.
//!
//! This crate holds the sync pipeline: credential lifecycle, watermark
//! based delta detection, the budgeted fetch scheduler, normalization and
//! weekly synthesis, and real-time candle aggregation. It is
//! database-agnostic; storage is reached through [`bars::BarStore`] and
//! [`credentials::TokenStore`], implemented by `barsync-storage-sqlite`.

pub mod bars;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod errors;
pub mod fetch;
pub mod normalize;
pub mod realtime;
pub mod session;
pub mod sync;
pub mod watermark;

pub use engine::{EngineDeps, SyncEngine};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
