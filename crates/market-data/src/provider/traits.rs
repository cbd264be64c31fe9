//! Market data provider trait definitions.
//!
//! This module defines the core `MarketDataProvider` trait that all
//! market data providers must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::MarketDataError;
use crate::models::{AccessGrant, FieldMap, ProviderRecord, Resolution};

use super::capabilities::{ProviderCapabilities, RateLimit};

/// Trait for market data providers.
///
/// Providers return raw records keyed by their own field labels together
/// with a [`FieldMap`] describing those labels. Authentication is explicit:
/// the caller owns the token lifecycle and passes the access token into every
/// data call.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use barsync_market_data::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};
///
/// struct MyProvider {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl MarketDataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities {
///             resolutions: &[Resolution::Daily],
///             max_intraday_days: 0,
///         }
///     }
///
///     // ... implement the remaining methods
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "KIS". Used for logging and as the
    /// key of the persisted token.
    fn id(&self) -> &'static str;

    /// Describes what this provider can serve.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Rate limiting configuration.
    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    /// Field labels used by records of the given resolution.
    fn field_map(&self, resolution: Resolution) -> FieldMap;

    /// Performs a client-credentials grant.
    ///
    /// Rejected credentials must surface as [`MarketDataError::Unauthorized`];
    /// everything else is treated as transient by the caller.
    async fn authenticate(&self) -> Result<AccessGrant, MarketDataError>;

    /// Most rows one `fetch_history` call returns for `resolution`, or `None`
    /// when a single call always covers the whole requested range.
    ///
    /// A call that comes back with this many rows may have been cut short;
    /// callers page backwards by re-requesting with an earlier `end`.
    fn history_page_rows(&self, _resolution: Resolution) -> Option<usize> {
        None
    }

    /// Fetch one page of records for `[start, end]`.
    ///
    /// Paged providers return the newest rows of the range first. See
    /// [`MarketDataProvider::history_page_rows`].
    async fn fetch_history(
        &self,
        access_token: &str,
        symbol: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ProviderRecord>, MarketDataError>;

    /// Fetch the most recent records within the provider's short lookback
    /// window. Used by the real-time path.
    async fn fetch_recent(
        &self,
        access_token: &str,
        symbol: &str,
        resolution: Resolution,
    ) -> Result<Vec<ProviderRecord>, MarketDataError>;
}
