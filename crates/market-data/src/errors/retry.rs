/// Classification for retry policy.
///
/// Used by the caller's retry loop to decide whether, and how long, to wait
/// before calling the provider again.
///
/// # Behavior Summary
///
/// | Class | Retry? | Wait before next attempt |
/// |-------|--------|--------------------------|
/// | `Never` | No | - |
/// | `WithBackoff` | Yes | Exponential backoff, capped |
/// | `Cooldown` | Yes | Fixed, longer rate-limit cooldown |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - bad symbol, rejected credentials, or terminal failure.
    /// The request is fundamentally invalid and retrying won't help.
    Never,

    /// Retry with exponential backoff.
    ///
    /// Used for transient failures: network errors, timeouts and 5xx responses.
    WithBackoff,

    /// The provider asked us to slow down (HTTP 429 or an equivalent
    /// provider code). Wait out the cooldown before the next attempt.
    Cooldown,
}

/// Errors that can be classified for retry.
///
/// Implemented by [`MarketDataError`](super::MarketDataError) and by the
/// caller-side error types that wrap it.
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}
