//! Provider capabilities and rate limiting configuration.
//!
//! This module defines structures for describing what a market data provider
//! can serve and how hard it may be called.

use std::time::Duration;

use crate::models::Resolution;

/// Describes the capabilities of a market data provider.
#[derive(Clone, Debug)]
pub struct ProviderCapabilities {
    /// Resolutions the provider serves directly. Anything else must be
    /// synthesized by the caller.
    pub resolutions: &'static [Resolution],

    /// How far back intraday history reaches, in days.
    pub max_intraday_days: u32,
}

impl ProviderCapabilities {
    pub fn serves(&self, resolution: Resolution) -> bool {
        self.resolutions.contains(&resolution)
    }
}

/// Rate limiting configuration for a provider.
///
/// Controls how aggressively we can call a provider to avoid
/// hitting their limits and getting blocked.
#[derive(Clone, Debug)]
pub struct RateLimit {
    /// Provider-imposed number of data calls per day.
    pub daily_call_limit: u32,

    /// Minimum delay between requests.
    pub min_delay: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            daily_call_limit: 1_000,
            min_delay: Duration::from_millis(100),
        }
    }
}
