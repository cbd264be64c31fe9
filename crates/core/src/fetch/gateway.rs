//! The single path every provider data call takes.
//!
//! Each attempt waits for the pacer, obtains a usable token, charges the
//! call budget, then calls the provider. A rejected token is invalidated so
//! the next attempt re-authenticates.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;

use barsync_market_data::{
    MarketDataError, MarketDataProvider, ProviderRecord, Resolution, RetryClass, Retryable,
};

use super::budget::{BudgetExhausted, Reservation};
use super::pacer::Pacer;
use super::retry::{RetryFailure, RetryPolicy};
use super::task::FailureReason;
use crate::credentials::{CredentialManager, Token};
use crate::errors::Error;
use crate::watermark::FetchRange;

#[derive(Error, Debug)]
pub enum CallError {
    #[error(transparent)]
    Provider(#[from] MarketDataError),

    #[error(transparent)]
    Budget(#[from] BudgetExhausted),

    #[error("credentials unavailable: {0}")]
    Credentials(Error),
}

impl Retryable for CallError {
    fn retry_class(&self) -> RetryClass {
        match self {
            // The token has been invalidated; the next attempt gets a new one.
            CallError::Provider(e) if e.is_unauthorized() => RetryClass::WithBackoff,
            CallError::Provider(e) => e.retry_class(),
            CallError::Budget(_) | CallError::Credentials(_) => RetryClass::Never,
        }
    }
}

impl From<RetryFailure<CallError>> for FailureReason {
    fn from(failure: RetryFailure<CallError>) -> Self {
        let attempts = failure.attempts;
        match failure.error {
            CallError::Budget(_) => FailureReason::BudgetExhausted,
            CallError::Credentials(e) => FailureReason::Auth(e.to_string()),
            CallError::Provider(e) if e.is_rate_limited() => {
                FailureReason::RateLimited { attempts }
            }
            CallError::Provider(e) if e.is_unauthorized() => FailureReason::Auth(e.to_string()),
            CallError::Provider(e) if failure.last_class != RetryClass::Never => {
                FailureReason::RetriesExhausted {
                    attempts,
                    message: e.to_string(),
                }
            }
            CallError::Provider(e) => FailureReason::Provider(e.to_string()),
        }
    }
}

/// Provider records together with the number of attempts it took.
#[derive(Debug)]
pub struct Fetched {
    pub records: Vec<ProviderRecord>,
    pub attempts: u32,
}

pub struct ProviderGateway {
    provider: Arc<dyn MarketDataProvider>,
    credentials: Arc<CredentialManager>,
    pacer: Arc<Pacer>,
    retry: RetryPolicy,
}

impl ProviderGateway {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        credentials: Arc<CredentialManager>,
        pacer: Arc<Pacer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            credentials,
            pacer,
            retry,
        }
    }

    pub fn provider(&self) -> &Arc<dyn MarketDataProvider> {
        &self.provider
    }

    pub async fn fetch_history(
        &self,
        reservation: &Reservation,
        symbol: &str,
        resolution: Resolution,
        range: &FetchRange,
    ) -> Result<Fetched, RetryFailure<CallError>> {
        let label = format!("{} {} history", symbol, resolution);
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let records = self
            .retry
            .run(&label, move |attempt| async move {
                attempts_ref.store(attempt, Ordering::Relaxed);
                let token = self.admit(reservation).await?;
                let result = self
                    .provider
                    .fetch_history(&token.value, symbol, resolution, range.start, range.end)
                    .await;
                self.settle(&token, result)
            })
            .await?;
        Ok(Fetched {
            records,
            attempts: attempts.load(Ordering::Relaxed),
        })
    }

    pub async fn fetch_recent(
        &self,
        reservation: &Reservation,
        symbol: &str,
        resolution: Resolution,
    ) -> Result<Fetched, RetryFailure<CallError>> {
        let label = format!("{} {} recent", symbol, resolution);
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let records = self
            .retry
            .run(&label, move |attempt| async move {
                attempts_ref.store(attempt, Ordering::Relaxed);
                let token = self.admit(reservation).await?;
                let result = self
                    .provider
                    .fetch_recent(&token.value, symbol, resolution)
                    .await;
                self.settle(&token, result)
            })
            .await?;
        Ok(Fetched {
            records,
            attempts: attempts.load(Ordering::Relaxed),
        })
    }

    async fn admit(&self, reservation: &Reservation) -> Result<Token, CallError> {
        self.pacer.wait().await;
        let token = self
            .credentials
            .acquire()
            .await
            .map_err(CallError::Credentials)?;
        reservation.consume()?;
        Ok(token)
    }

    fn settle<T>(
        &self,
        token: &Token,
        result: Result<T, MarketDataError>,
    ) -> Result<T, CallError> {
        result.map_err(|e| {
            if e.is_unauthorized() {
                self.credentials.invalidate(token);
            }
            CallError::Provider(e)
        })
    }
}
