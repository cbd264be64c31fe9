//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining retry behavior
//! - [`Retryable`]: Trait shared by every error the retry loop understands

mod retry;

pub use retry::{RetryClass, Retryable};

use thiserror::Error;

use crate::models::Resolution;

/// Errors that can occur during market data operations.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method, which determines how the caller's retry policy should handle the error.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The provider rejected the credentials or the access token
    /// (HTTP 401/403, or a provider code meaning "token expired").
    #[error("Unauthorized by {provider}: {message}")]
    Unauthorized {
        /// The provider that rejected the request
        provider: String,
        /// The provider's explanation
        message: String,
    },

    /// The requested symbol was not found by the provider.
    /// This is a terminal error - retrying won't help.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The provider cannot serve this resolution directly.
    #[error("Unsupported resolution for {provider}: {resolution}")]
    UnsupportedResolution {
        /// The provider asked for the series
        provider: String,
        /// The resolution it cannot serve
        resolution: Resolution,
    },

    /// The provider rate limited the request (HTTP 429 or equivalent).
    /// Should retry after a cooldown.
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The request to the provider timed out.
    /// Should retry with exponential backoff.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// The provider answered with a 5xx status.
    #[error("Server error from {provider}: HTTP {status}")]
    ServerError {
        /// The provider that failed
        provider: String,
        /// HTTP status code
        status: u16,
    },

    /// A provider-specific error occurred (non-zero return code, 4xx other
    /// than auth/rate limiting).
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// The response body could not be decoded.
    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse {
        /// The provider that sent the body
        provider: String,
        /// Decoder message
        message: String,
    },

    /// A network error occurred while communicating with a provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::Never`]: Don't retry, the error is terminal
    /// - [`RetryClass::WithBackoff`]: Retry with exponential backoff
    /// - [`RetryClass::Cooldown`]: Wait out the rate-limit cooldown, then retry
    ///
    /// # Examples
    ///
    /// ```
    /// use barsync_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::RateLimited { provider: "KIS".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::Cooldown);
    ///
    /// let error = MarketDataError::SymbolNotFound("INVALID".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Terminal errors - never retry
            Self::Unauthorized { .. }
            | Self::SymbolNotFound(_)
            | Self::UnsupportedResolution { .. }
            | Self::ProviderError { .. }
            | Self::MalformedResponse { .. } => RetryClass::Never,

            Self::RateLimited { .. } => RetryClass::Cooldown,

            // Transient errors - retry with backoff
            Self::Timeout { .. } | Self::ServerError { .. } => RetryClass::WithBackoff,

            Self::Network(err) => {
                if err.is_decode() || err.is_builder() {
                    RetryClass::Never
                } else {
                    RetryClass::WithBackoff
                }
            }
        }
    }

    /// Whether the provider rejected the credentials or token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Whether the provider asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl Retryable for MarketDataError {
    fn retry_class(&self) -> RetryClass {
        MarketDataError::retry_class(self)
    }
}
