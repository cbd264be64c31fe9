use chrono::{DateTime, Duration, Utc};

use barsync_market_data::AccessGrant;

/// Grants claiming a longer lifetime are clamped to one year.
const MAX_LIFETIME_SECS: i64 = 366 * 24 * 3600;

/// A provider access token and its validity window.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn from_grant(grant: &AccessGrant, issued_at: DateTime<Utc>) -> Self {
        let lifetime = i64::try_from(grant.expires_in)
            .unwrap_or(MAX_LIFETIME_SECS)
            .min(MAX_LIFETIME_SECS);
        Self {
            value: grant.access_token.clone(),
            issued_at,
            expires_at: issued_at + Duration::seconds(lifetime),
        }
    }

    /// Usable while `now < expires_at - safety_margin`.
    pub fn is_usable(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        now < self.expires_at - safety_margin
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
