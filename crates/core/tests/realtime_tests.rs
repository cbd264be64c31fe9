//! Real-time polling and candle aggregation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc, Weekday};
use rust_decimal_macros::dec;

use barsync_core::clock::{ManualClock, TokioSleeper};
use barsync_core::config::{RetryConfig, SessionConfig, SessionEndPolicy, SyncConfig};
use barsync_core::credentials::CredentialManager;
use barsync_core::fetch::{CallBudget, Pacer, ProviderGateway, RetryPolicy};
use barsync_core::normalize::Normalizer;
use barsync_core::realtime::{
    spawn_aggregator, LoopExit, RealtimeOptions, RealtimeScheduler, TickOutcome,
};
use barsync_core::session::TradingSession;
use barsync_core::{EngineDeps, SyncEngine};
use barsync_market_data::{AccessGrant, MarketDataError, Resolution};

use common::{tick_record, FakeProvider, InMemoryBarStore, MemoryTokenStore};

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    // Tuesday.
    Utc.with_ymd_and_hms(2024, 1, 2, h, m, s).unwrap()
}

fn utc_session() -> SessionConfig {
    SessionConfig {
        timezone: "UTC".to_string(),
        ..SessionConfig::default()
    }
}

fn scenario_b_window() -> Vec<barsync_market_data::ProviderRecord> {
    vec![
        tick_record("20240102", "100005", "100", "5"),
        tick_record("20240102", "100040", "102", "3"),
        tick_record("20240102", "100105", "101", "7"),
    ]
}

struct Rig {
    scheduler: RealtimeScheduler,
    provider: FakeProvider,
    store: InMemoryBarStore,
    clock: Arc<ManualClock>,
    budget: Arc<CallBudget>,
}

fn rig_for(resolution: Resolution, end_policy: SessionEndPolicy, budget_limit: u32) -> Rig {
    let provider = FakeProvider::new();
    let store = InMemoryBarStore::new();
    let clock = Arc::new(ManualClock::new(at(10, 1, 10)));
    let session = TradingSession::from_config(&utc_session()).unwrap();

    let retry = RetryPolicy::new(&RetryConfig::default(), Arc::new(TokioSleeper));
    let credentials = Arc::new(CredentialManager::new(
        Arc::new(provider.clone()),
        Arc::new(MemoryTokenStore::default()),
        clock.clone(),
        retry.clone(),
        chrono::Duration::hours(1),
    ));
    let budget = CallBudget::new(budget_limit, session.timezone(), clock.clone());
    let gateway = Arc::new(ProviderGateway::new(
        Arc::new(provider.clone()),
        credentials,
        Arc::new(Pacer::new(Duration::ZERO)),
        retry,
    ));
    let (aggregator, _join) =
        spawn_aggregator(Arc::new(store.clone()), clock.clone(), Weekday::Fri);

    let scheduler = RealtimeScheduler::new(
        gateway,
        budget.clone(),
        aggregator,
        Normalizer::new(Weekday::Fri),
        session,
        clock.clone(),
        RealtimeOptions::new(vec!["TST1".to_string()], vec![resolution]),
        4,
        end_policy,
        true,
    );

    Rig {
        scheduler,
        provider,
        store,
        clock,
        budget,
    }
}

fn rig(end_policy: SessionEndPolicy, budget_limit: u32) -> Rig {
    rig_for(Resolution::OneMinute, end_policy, budget_limit)
}

#[tokio::test]
async fn test_samples_fold_and_roll_into_stored_candle() {
    let rig = rig(SessionEndPolicy::KeepOpen, 100);
    rig.provider.push_recent(scenario_b_window());

    let TickOutcome::Polled(summary) = rig.scheduler.tick().await else {
        panic!("expected an in-session tick");
    };
    assert_eq!(summary.fed, 3);
    assert_eq!(summary.polled, 1);

    let stored = rig.store.series("TST1", Resolution::OneMinute);
    assert_eq!(stored.len(), 1);
    let bar = &stored[0];
    assert_eq!(bar.period_start, at(10, 0, 0));
    assert_eq!(bar.open, dec!(100));
    assert_eq!(bar.high, dec!(102));
    assert_eq!(bar.low, dec!(100));
    assert_eq!(bar.close, dec!(102));
    assert_eq!(bar.volume, 8);

    let open = rig.scheduler.aggregator().snapshot().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].period_start, at(10, 1, 0));
    assert_eq!(open[0].volume, 7);
    assert_eq!(rig.budget.usage().used, 1);
}

#[tokio::test]
async fn test_repeated_window_is_not_fed_twice() {
    let rig = rig(SessionEndPolicy::KeepOpen, 100);
    rig.provider.push_recent(scenario_b_window());

    rig.scheduler.tick().await;
    rig.clock.set(at(10, 2, 10));
    let TickOutcome::Polled(summary) = rig.scheduler.tick().await else {
        panic!("expected an in-session tick");
    };

    assert_eq!(summary.fed, 0);
    assert_eq!(summary.revised, 1);
    let open = rig.scheduler.aggregator().snapshot().await.unwrap();
    assert_eq!(open[0].volume, 7);
    assert_eq!(rig.provider.recent_calls(), 2);
}

#[tokio::test]
async fn test_forming_bar_is_stored_with_its_final_revision() {
    let rig = rig(SessionEndPolicy::KeepOpen, 100);
    rig.provider.push_recent(vec![tick_record("20240102", "100000", "100", "100")]);
    rig.provider.push_recent(vec![
        tick_record("20240102", "100000", "105", "500"),
        tick_record("20240102", "100100", "104", "50"),
    ]);

    rig.scheduler.tick().await;
    rig.clock.set(at(10, 2, 10));
    let TickOutcome::Polled(summary) = rig.scheduler.tick().await else {
        panic!("expected an in-session tick");
    };
    assert_eq!(summary.revised, 1);
    assert_eq!(summary.fed, 1);

    let stored = rig.store.series("TST1", Resolution::OneMinute);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].period_start, at(10, 0, 0));
    assert_eq!(stored[0].close, dec!(105));
    assert_eq!(stored[0].high, dec!(105));
    assert_eq!(stored[0].volume, 500);

    let open = rig.scheduler.aggregator().snapshot().await.unwrap();
    assert_eq!(open[0].period_start, at(10, 1, 0));
    assert_eq!(open[0].volume, 50);
}

#[tokio::test]
async fn test_tick_outside_session_fetches_nothing() {
    let rig = rig(SessionEndPolicy::KeepOpen, 100);
    rig.provider.push_recent(scenario_b_window());
    rig.clock.set(at(20, 0, 0));

    let outcome = rig.scheduler.tick().await;

    assert_eq!(outcome, TickOutcome::SessionClosed { flushed: None });
    assert_eq!(rig.provider.recent_calls(), 0);
    assert_eq!(rig.provider.auth_calls(), 0);
    assert_eq!(rig.budget.usage().used, 0);
}

#[tokio::test]
async fn test_flush_at_close_persists_open_candles() {
    let rig = rig(SessionEndPolicy::FlushAtClose, 100);
    rig.provider.push_recent(scenario_b_window());
    rig.scheduler.tick().await;

    rig.clock.set(at(15, 31, 0));
    let TickOutcome::SessionClosed { flushed: Some(report) } = rig.scheduler.tick().await else {
        panic!("expected a flush at the session transition");
    };
    assert_eq!(report.flushed, 1);
    assert_eq!(report.pending, 0);
    assert_eq!(rig.store.series("TST1", Resolution::OneMinute).len(), 2);

    // Only the transition flushes.
    rig.clock.set(at(15, 32, 0));
    assert_eq!(
        rig.scheduler.tick().await,
        TickOutcome::SessionClosed { flushed: None }
    );
}

#[tokio::test]
async fn test_failed_flush_is_parked_and_retried() {
    let rig = rig(SessionEndPolicy::KeepOpen, 100);
    rig.provider.push_recent(scenario_b_window());
    rig.store.set_fail_writes(true);

    rig.scheduler.tick().await;
    assert!(rig.store.series("TST1", Resolution::OneMinute).is_empty());

    rig.store.set_fail_writes(false);
    let remaining = rig.scheduler.aggregator().retry_pending().await.unwrap();
    assert_eq!(remaining, 0);

    let stored = rig.store.series("TST1", Resolution::OneMinute);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].volume, 8);
}

#[tokio::test]
async fn test_flush_is_idempotent() {
    let rig = rig(SessionEndPolicy::KeepOpen, 100);
    rig.provider.push_recent(scenario_b_window());
    rig.scheduler.tick().await;

    let first = rig.scheduler.aggregator().flush_all().await.unwrap();
    let second = rig.scheduler.aggregator().flush_all().await.unwrap();

    assert_eq!(first.flushed, 1);
    assert_eq!(second.flushed, 0);
    assert_eq!(rig.store.series("TST1", Resolution::OneMinute).len(), 2);
}

#[tokio::test]
async fn test_exhausted_budget_defers_the_poll() {
    let rig = rig(SessionEndPolicy::KeepOpen, 1);
    let _hog = rig.budget.reserve(1).unwrap();
    rig.provider.push_recent(scenario_b_window());

    let TickOutcome::Polled(summary) = rig.scheduler.tick().await else {
        panic!("expected an in-session tick");
    };
    assert_eq!(summary.deferred, 1);
    assert_eq!(rig.provider.recent_calls(), 0);
}

#[tokio::test]
async fn test_five_minute_series_fires_on_its_boundary_only() {
    let rig = rig_for(Resolution::FiveMinutes, SessionEndPolicy::KeepOpen, 100);

    rig.clock.set(at(10, 3, 0));
    assert_eq!(rig.scheduler.tick().await, TickOutcome::Idle);
    rig.clock.set(at(10, 5, 2));
    assert!(matches!(rig.scheduler.tick().await, TickOutcome::Polled(_)));
    assert_eq!(rig.provider.recent_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_engine_stop_flushes_open_candles() {
    let provider = FakeProvider::new();
    provider.push_recent(scenario_b_window());
    let store = InMemoryBarStore::new();
    let config = SyncConfig {
        instruments: vec!["TST1".to_string()],
        resolutions: vec![Resolution::OneMinute],
        session: utc_session(),
        min_call_delay_ms: 0,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(
        config,
        EngineDeps::new(
            Arc::new(provider.clone()),
            Arc::new(store.clone()),
            Arc::new(MemoryTokenStore::default()),
        )
        .with_clock(Arc::new(ManualClock::new(at(10, 1, 10)))),
    )
    .unwrap();

    let handle = engine
        .start_realtime_scheduler(RealtimeOptions::new(
            vec!["TST1".to_string()],
            vec![Resolution::OneMinute],
        ))
        .unwrap();

    for _ in 0..100 {
        if provider.recent_calls() > 0 && !store.series("TST1", Resolution::OneMinute).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let exit = engine.stop_realtime_scheduler(handle).await.unwrap();
    assert_eq!(exit, LoopExit::Stopped);

    let stored = store.series("TST1", Resolution::OneMinute);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].period_start, at(10, 1, 0));
    assert_eq!(stored[1].volume, 7);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_end_the_loop_on_its_own() {
    let provider = FakeProvider::new();
    provider.push_recent(scenario_b_window());
    provider.push_auth(Ok(AccessGrant {
        access_token: "token-1".to_string(),
        expires_in: 86_400,
        token_type: Some("Bearer".to_string()),
    }));
    provider.push_auth(Err(MarketDataError::Unauthorized {
        provider: "FAKE".to_string(),
        message: "appkey revoked".to_string(),
    }));
    provider.push_call_error(MarketDataError::Unauthorized {
        provider: "FAKE".to_string(),
        message: "EGW00123".to_string(),
    });
    let config = SyncConfig {
        instruments: vec!["TST1".to_string()],
        resolutions: vec![Resolution::OneMinute],
        session: utc_session(),
        min_call_delay_ms: 0,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(
        config,
        EngineDeps::new(
            Arc::new(provider.clone()),
            Arc::new(InMemoryBarStore::new()),
            Arc::new(MemoryTokenStore::default()),
        )
        .with_clock(Arc::new(ManualClock::new(at(10, 1, 10)))),
    )
    .unwrap();

    let mut handle = engine
        .start_realtime_scheduler(RealtimeOptions::new(
            vec!["TST1".to_string()],
            vec![Resolution::OneMinute],
        ))
        .unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(600), handle.finished())
        .await
        .expect("loop should end without a stop request")
        .unwrap();
    assert!(matches!(exit, LoopExit::AuthFailed(ref reason) if reason.is_auth()));
    assert!(handle.is_finished());
    assert_eq!(provider.auth_calls(), 2);

    // Stopping afterwards reports the same exit.
    let exit = engine.stop_realtime_scheduler(handle).await.unwrap();
    assert!(matches!(exit, LoopExit::AuthFailed(_)));
    engine.shutdown().await;
}
