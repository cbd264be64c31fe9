//! Barsync Market Data Crate
//!
//! This crate talks to external market-data providers and hands back raw,
//! provider-labelled records. It deliberately knows nothing about storage,
//! budgets or candles; those live in `barsync-core`.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Client-credentials authentication against the provider
//! - Historical series for daily/weekly/monthly and intraday resolutions
//! - Short "recent window" fetches for the real-time path
//! - Error classification that drives the caller's retry policy
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+
//! |   Core pipeline  | --> | MarketDataProvider|  (trait seam)
//! +------------------+     +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |   KisProvider    |  (REST client)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |  ProviderRecord  |  (label -> value rows)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |     FieldMap     |  (how core reads the labels)
//!                          +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`Resolution`] - Bar period, with flooring and stepping helpers
//! - [`ProviderRecord`] - One raw row keyed by the provider's field labels
//! - [`FieldMap`] - Describes which labels carry OHLCV and the timestamp
//! - [`AccessGrant`] - Result of a client-credentials grant

pub mod errors;
pub mod models;
pub mod provider;

pub use errors::{MarketDataError, RetryClass, Retryable};

pub use models::{AccessGrant, FieldMap, ProviderRecord, Resolution, TimestampFields};

pub use provider::kis::{KisConfig, KisProvider};
pub use provider::{MarketDataProvider, ProviderCapabilities};
