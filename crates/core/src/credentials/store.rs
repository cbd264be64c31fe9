use async_trait::async_trait;

use super::model::Token;
use crate::errors::Result;

/// Durable home of the shared access token, so restarts and sibling
/// processes reuse it instead of re-authenticating.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Token>>;

    /// Overwrites the stored token.
    async fn save(&self, token: &Token) -> Result<()>;
}
