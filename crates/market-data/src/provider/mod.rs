//! Market data provider abstractions and implementations.
//!
//! This module contains:
//! - The `MarketDataProvider` trait that all providers implement
//! - Provider capabilities and rate limiting configuration
//! - Concrete provider implementations (KIS)
//!
//! # Architecture
//!
//! The provider system is designed to be:
//! - **Provider-agnostic**: The core pipeline only sees records and field maps
//! - **Extensible**: New providers can be added by implementing `MarketDataProvider`
//! - **Stateless**: Tokens, budgets and retries are owned by the caller

mod capabilities;
mod traits;

pub mod kis;

// Re-exports
pub use capabilities::{ProviderCapabilities, RateLimit};
pub use traits::MarketDataProvider;
