use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Duration;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use barsync_market_data::MarketDataProvider;

use super::model::Token;
use super::store::TokenStore;
use crate::clock::Clock;
use crate::errors::{Error, Result};
use crate::fetch::RetryPolicy;

#[derive(Default)]
struct CachedToken {
    current: Option<Token>,
    /// Value the provider rejected; a stored copy of it is never adopted.
    rejected: Option<String>,
}

/// Owns the provider access token.
///
/// Readers share an `RwLock`-guarded cache. Refreshes are serialized by an
/// async gate, and the cache is re-checked after the gate is taken, so
/// concurrent callers cause at most one authentication round-trip.
pub struct CredentialManager {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    safety_margin: Duration,
    cache: RwLock<CachedToken>,
    refresh_gate: Mutex<()>,
    grants_issued: AtomicU64,
}

impl CredentialManager {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        safety_margin: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            clock,
            retry,
            safety_margin,
            cache: RwLock::new(CachedToken::default()),
            refresh_gate: Mutex::new(()),
            grants_issued: AtomicU64::new(0),
        }
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, CachedToken> {
        self.cache.read().unwrap_or_else(|poisoned| {
            warn!("Token cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, CachedToken> {
        self.cache.write().unwrap_or_else(|poisoned| {
            warn!("Token cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn usable_cached(&self) -> Option<Token> {
        let now = self.clock.now();
        self.read_cache()
            .current
            .as_ref()
            .filter(|token| token.is_usable(now, self.safety_margin))
            .cloned()
    }

    /// Number of successful authentications performed by this manager.
    pub fn grants_issued(&self) -> u64 {
        self.grants_issued.load(Ordering::Relaxed)
    }

    /// Returns a token that stays valid for at least the safety margin.
    ///
    /// Order of preference: the in-memory token, the persisted token, a
    /// fresh grant (which is then persisted).
    pub async fn acquire(&self) -> Result<Token> {
        if let Some(token) = self.usable_cached() {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock().await;

        // Another caller may have refreshed while we waited on the gate.
        if let Some(token) = self.usable_cached() {
            return Ok(token);
        }

        if let Some(token) = self.load_persisted().await {
            self.write_cache().current = Some(token.clone());
            return Ok(token);
        }

        let token = self.authenticate().await?;
        if let Err(e) = self.store.save(&token).await {
            error!(
                "Failed to persist access token for '{}': {}",
                self.provider.id(),
                e
            );
        }

        let mut cache = self.write_cache();
        cache.current = Some(token.clone());
        cache.rejected = None;
        Ok(token)
    }

    /// Drops `token` from the cache after the provider rejected it. A token
    /// that has already been replaced is left alone.
    pub fn invalidate(&self, token: &Token) {
        let mut cache = self.write_cache();
        if cache.current.as_ref().map(|t| &t.value) == Some(&token.value) {
            warn!(
                "Access token for '{}' was rejected, forcing refresh",
                self.provider.id()
            );
            cache.current = None;
        }
        cache.rejected = Some(token.value.clone());
    }

    async fn load_persisted(&self) -> Option<Token> {
        match self.store.load().await {
            Ok(Some(token)) => {
                let rejected = self.read_cache().rejected.as_deref() == Some(token.value.as_str());
                if !rejected && token.is_usable(self.clock.now(), self.safety_margin) {
                    debug!(
                        "Reusing persisted access token for '{}' (expires {})",
                        self.provider.id(),
                        token.expires_at
                    );
                    return Some(token);
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Could not read persisted token for '{}': {}",
                    self.provider.id(),
                    e
                );
                None
            }
        }
    }

    async fn authenticate(&self) -> Result<Token> {
        let provider = &self.provider;
        let provider_id = provider.id();
        info!("Requesting new access token from '{}'", provider_id);

        let grant = self
            .retry
            .run("authenticate", move |_| provider.authenticate())
            .await
            .map_err(|failure| {
                if failure.error.is_unauthorized() {
                    Error::Auth(failure.error.to_string())
                } else {
                    Error::TransientAuth(format!(
                        "{} (after {} attempts)",
                        failure.error, failure.attempts
                    ))
                }
            })?;

        self.grants_issued.fetch_add(1, Ordering::Relaxed);
        let token = Token::from_grant(&grant, self.clock.now());
        info!(
            "Access token for '{}' valid until {}",
            provider_id, token.expires_at
        );
        Ok(token)
    }
}
