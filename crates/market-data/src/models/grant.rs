use serde::{Deserialize, Serialize};

/// Lifetime assumed when the provider omits `expires_in` (24 hours).
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 86_400;

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

/// Response of a client-credentials grant.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AccessGrant {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}
