//! End-to-end backfill through the engine with fake collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;

use barsync_core::clock::ManualClock;
use barsync_core::config::SyncConfig;
use barsync_core::fetch::FailureReason;
use barsync_core::sync::{BatchSummary, SyncStatus};
use barsync_core::{EngineDeps, Error, SyncEngine};
use barsync_market_data::{MarketDataError, Resolution};

use common::{daily_record, FakeProvider, InMemoryBarStore, MemoryTokenStore, RecordingSleeper};

struct Harness {
    engine: SyncEngine,
    provider: FakeProvider,
    store: InMemoryBarStore,
    sleeper: Arc<RecordingSleeper>,
}

fn friday_evening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 5, 18, 0, 0).unwrap()
}

fn config() -> SyncConfig {
    SyncConfig {
        instruments: vec!["TST1".to_string()],
        resolutions: vec![Resolution::Daily, Resolution::Weekly],
        history_horizon_days: 5,
        min_call_delay_ms: 0,
        ..SyncConfig::default()
    }
}

fn harness(config: SyncConfig, provider: FakeProvider) -> Harness {
    let store = InMemoryBarStore::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let deps = EngineDeps::new(
        Arc::new(provider.clone()),
        Arc::new(store.clone()),
        Arc::new(MemoryTokenStore::default()),
    )
    .with_clock(Arc::new(ManualClock::new(friday_evening())))
    .with_sleeper(sleeper.clone());

    Harness {
        engine: SyncEngine::new(config, deps).unwrap(),
        provider,
        store,
        sleeper,
    }
}

fn first_week_provider() -> FakeProvider {
    let provider = FakeProvider::new();
    let closes = ["10", "11", "9", "12", "13"];
    let records = closes
        .iter()
        .enumerate()
        .map(|(i, c)| daily_record(&format!("2024010{}", i + 1), c, c, c, c, "1000"))
        .collect();
    provider.set_history("TST1", Resolution::Daily, records);
    provider
}

#[tokio::test]
async fn test_cold_start_backfills_daily_and_synthesizes_weekly() {
    let h = harness(config(), first_week_provider());

    let reports = h
        .engine
        .run_backfill_batch(&["TST1".to_string()], &[Resolution::Daily, Resolution::Weekly])
        .await
        .unwrap();

    let daily = h.store.series("TST1", Resolution::Daily);
    assert_eq!(daily.len(), 5);
    assert_eq!(daily[0].period_start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

    let weekly = h.store.series("TST1", Resolution::Weekly);
    assert_eq!(weekly.len(), 1);
    assert_eq!(weekly[0].open, dec!(10));
    assert_eq!(weekly[0].high, dec!(13));
    assert_eq!(weekly[0].low, dec!(9));
    assert_eq!(weekly[0].close, dec!(13));
    assert_eq!(weekly[0].volume, 5_000);

    let daily_report = reports.iter().find(|r| r.resolution == Resolution::Daily).unwrap();
    assert_eq!(daily_report.status, SyncStatus::Succeeded);
    assert_eq!(daily_report.inserted, 5);
    assert_eq!(daily_report.attempts, 1);
    let weekly_report = reports.iter().find(|r| r.resolution == Resolution::Weekly).unwrap();
    assert_eq!(weekly_report.inserted, 1);

    // One call for dailies; weekly costs nothing.
    assert_eq!(h.provider.history_calls(), 1);
    assert_eq!(h.engine.budget_usage().used, 1);
}

#[tokio::test]
async fn test_second_run_is_up_to_date_and_makes_no_calls() {
    let h = harness(config(), first_week_provider());
    h.engine.run_configured_backfill().await.unwrap();

    let summary = h.engine.run_configured_backfill().await.unwrap();

    assert_eq!(summary.up_to_date(), 2);
    assert_eq!(h.provider.history_calls(), 1);
    assert_eq!(h.provider.auth_calls(), 1);
}

#[tokio::test]
async fn test_job_is_deferred_when_budget_cannot_cover_it() {
    let config = SyncConfig {
        daily_call_budget: 1,
        ..config()
    };
    let h = harness(config, first_week_provider());

    let reports = h
        .engine
        .run_backfill_batch(&["TST1".to_string()], &[Resolution::Daily, Resolution::Monthly])
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.status == SyncStatus::Deferred));
    assert!(reports
        .iter()
        .all(|r| r.failure == Some(FailureReason::BudgetExhausted)));
    assert_eq!(h.provider.history_calls(), 0);

    let summary = BatchSummary::new(reports);
    assert_eq!(summary.retry_subset().len(), 2);
}

#[tokio::test]
async fn test_paged_history_is_walked_back_to_the_range_start() {
    let h = harness(config(), first_week_provider().with_page_rows(2));

    let report = h
        .engine
        .sync_instrument("TST1", Resolution::Daily)
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Succeeded);
    assert_eq!(report.inserted, 5);
    assert_eq!(report.attempts, 3);
    assert_eq!(h.store.series("TST1", Resolution::Daily).len(), 5);
    // Two full pages, then a short one that ends the walk.
    assert_eq!(h.provider.history_calls(), 3);
    assert_eq!(h.engine.budget_usage().used, 3);

    let again = h
        .engine
        .sync_instrument("TST1", Resolution::Daily)
        .await
        .unwrap();
    assert_eq!(again.status, SyncStatus::UpToDate);
    assert_eq!(h.provider.history_calls(), 3);
}

#[tokio::test]
async fn test_page_limit_fails_task_without_storing_partial_history() {
    let config = SyncConfig {
        max_history_pages: 2,
        ..config()
    };
    let h = harness(config, first_week_provider().with_page_rows(2));

    let report = h
        .engine
        .sync_instrument("TST1", Resolution::Daily)
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Failed);
    assert_eq!(
        report.failure,
        Some(FailureReason::HistoryTruncated {
            pages: 2,
            oldest: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        })
    );
    assert_eq!(report.failed, 4);
    assert!(!report.is_retryable());
    assert!(h.store.series("TST1", Resolution::Daily).is_empty());
}

#[tokio::test]
async fn test_budget_running_out_between_pages_defers_the_whole_task() {
    let config = SyncConfig {
        daily_call_budget: 2,
        ..config()
    };
    let h = harness(config, first_week_provider().with_page_rows(2));

    let report = h
        .engine
        .sync_instrument("TST1", Resolution::Daily)
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Deferred);
    assert_eq!(report.failure, Some(FailureReason::BudgetExhausted));
    assert_eq!(h.provider.history_calls(), 2);
    assert!(h.store.series("TST1", Resolution::Daily).is_empty());
}

#[tokio::test]
async fn test_rate_limited_task_is_deferred_after_cooldowns() {
    let provider = first_week_provider();
    for _ in 0..5 {
        provider.push_call_error(MarketDataError::RateLimited {
            provider: "FAKE".to_string(),
        });
    }
    let h = harness(config(), provider);

    let report = h
        .engine
        .sync_instrument("TST1", Resolution::Daily)
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Deferred);
    assert_eq!(report.failure, Some(FailureReason::RateLimited { attempts: 5 }));
    assert_eq!(report.attempts, 5);
    assert_eq!(h.sleeper.delays(), vec![Duration::from_secs(60); 4]);
    assert!(h.store.series("TST1", Resolution::Daily).is_empty());
}

#[tokio::test]
async fn test_transient_errors_are_retried_with_backoff() {
    let provider = first_week_provider();
    provider.push_call_error(MarketDataError::Timeout {
        provider: "FAKE".to_string(),
    });
    provider.push_call_error(MarketDataError::ServerError {
        provider: "FAKE".to_string(),
        status: 502,
    });
    let h = harness(config(), provider);

    let report = h
        .engine
        .sync_instrument("TST1", Resolution::Daily)
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Succeeded);
    assert_eq!(report.attempts, 3);
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_millis(500), Duration::from_millis(1_000)]
    );
    // The two retries drew on the unreserved budget.
    assert_eq!(h.engine.budget_usage().used, 3);
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_mid_task() {
    let provider = first_week_provider();
    provider.push_call_error(MarketDataError::Unauthorized {
        provider: "FAKE".to_string(),
        message: "EGW00123".to_string(),
    });
    let h = harness(config(), provider);

    let report = h
        .engine
        .sync_instrument("TST1", Resolution::Daily)
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Succeeded);
    assert_eq!(h.provider.auth_calls(), 2);
    assert_eq!(
        *h.provider.tokens_seen.lock().unwrap(),
        vec!["token-1".to_string(), "token-2".to_string()]
    );
}

#[tokio::test]
async fn test_persistence_failure_fails_weekly_dependency() {
    let h = harness(config(), first_week_provider());
    h.store.set_fail_writes(true);

    let summary = h.engine.run_configured_backfill().await.unwrap();

    let daily = summary
        .reports
        .iter()
        .find(|r| r.resolution == Resolution::Daily)
        .unwrap();
    assert_eq!(daily.status, SyncStatus::Failed);
    assert!(matches!(daily.failure, Some(FailureReason::Persistence(_))));
    assert_eq!(daily.failed, 5);

    let weekly = summary
        .reports
        .iter()
        .find(|r| r.resolution == Resolution::Weekly)
        .unwrap();
    assert_eq!(
        weekly.failure,
        Some(FailureReason::DependencyFailed(Resolution::Daily))
    );
    assert_eq!(summary.retry_subset().len(), 2);
}

#[tokio::test]
async fn test_malformed_rows_are_counted_not_stored() {
    let provider = FakeProvider::new();
    provider.set_history(
        "TST1",
        Resolution::Daily,
        vec![
            daily_record("20240102", "10", "11", "9", "10", "100"),
            daily_record("20240103", "10", "", "9", "10", "100"),
            daily_record("20240104", "10", "8", "9", "10", "100"),
        ],
    );
    let h = harness(config(), provider);

    let report = h
        .engine
        .sync_instrument("TST1", Resolution::Daily)
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.malformed, 2);
    assert_eq!(report.failed, 2);
}

#[tokio::test]
async fn test_bad_credentials_abort_bootstrap_and_batch() {
    let provider = first_week_provider();
    provider.push_auth(Err(MarketDataError::Unauthorized {
        provider: "FAKE".to_string(),
        message: "invalid appsecret".to_string(),
    }));
    provider.push_auth(Err(MarketDataError::Unauthorized {
        provider: "FAKE".to_string(),
        message: "invalid appsecret".to_string(),
    }));
    let h = harness(config(), provider);

    assert!(matches!(h.engine.bootstrap().await, Err(Error::Auth(_))));
    assert!(matches!(
        h.engine.run_configured_backfill().await,
        Err(Error::Auth(_))
    ));
    assert_eq!(h.provider.history_calls(), 0);
}
