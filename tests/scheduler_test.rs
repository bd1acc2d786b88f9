//! Tests for background refresh scheduling

mod common;

use common::{stamp, FakeAdapter, Fakes};
use std::time::Duration;
use truthlens::cache::{RefreshScheduler, RunReason, SchedulerState};
use truthlens::{CacheBuilder, CacheError, Domain, RetryPolicy};

#[tokio::test]
async fn test_trigger_without_schedulers_fails() {
    let fakes = Fakes::new();
    let manager = fakes.manager(CacheBuilder::new());

    let err = manager.trigger_scheduled_run(Domain::Analysis).await.unwrap_err();
    assert_eq!(err, CacheError::SchedulerUnavailable { domain: Domain::Analysis });
}

#[tokio::test]
async fn test_run_once_refreshes_hot_keys_without_counting_lookups() {
    let fakes = Fakes::new();
    let manager = fakes.manager(CacheBuilder::new());

    manager.get_or_fetch(Domain::Markets, "bitcoin_market").await.unwrap();
    manager.get_or_fetch(Domain::Markets, "ethereum_market").await.unwrap();

    let (scheduler, _handle) = RefreshScheduler::new(manager.domain(Domain::Markets), Vec::new());
    let report = scheduler.run_once(RunReason::Manual).await;

    assert_eq!(report.keys, 2);
    assert_eq!(report.refreshed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(fakes.markets.calls(), 4);

    // The refreshed value replaced the cached one
    let value = manager.get_or_fetch(Domain::Markets, "bitcoin_market").await.unwrap();
    assert!(stamp(&value) > 2);

    let usage = manager.metrics_snapshot().await;
    let markets = usage.domain(Domain::Markets);
    assert_eq!(markets.counters.misses, 2);
    assert_eq!(markets.counters.hits, 1);
    assert_eq!(markets.counters.upstream_calls, 2);
    assert_eq!(markets.counters.refreshes, 2);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_value() {
    let fakes = Fakes::new();
    let manager = fakes.manager(CacheBuilder::new().with_retry(RetryPolicy::none()));

    manager.get_or_fetch(Domain::Comments, "bitcoin_market").await.unwrap();
    fakes.comments.set_failure(Some(CacheError::unavailable(Domain::Comments, "down")));

    let (scheduler, _handle) = RefreshScheduler::new(manager.domain(Domain::Comments), Vec::new());
    let report = scheduler.run_once(RunReason::Scheduled).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.refreshed, 0);

    let value = manager.get_or_fetch(Domain::Comments, "bitcoin_market").await.unwrap();
    assert_eq!(stamp(&value), 1);

    let usage = manager.metrics_snapshot().await;
    assert_eq!(usage.domain(Domain::Comments).counters.refresh_failures, 1);
}

#[tokio::test]
async fn test_pinned_keys_are_always_refreshed() {
    let fakes = Fakes::new();
    let manager = fakes.manager(CacheBuilder::new());

    let pinned = vec!["bitcoin_market".to_string(), "ethereum_market".to_string()];
    let (scheduler, _handle) = RefreshScheduler::new(manager.domain(Domain::Analysis), pinned);
    let report = scheduler.run_once(RunReason::Startup).await;

    assert_eq!(report.keys, 2);
    assert_eq!(fakes.analysis.calls(), 2);
    assert_eq!(manager.cache_stats().await.domains[&Domain::Analysis].entries, 2);
}

#[tokio::test]
async fn test_manual_trigger_runs_analysis_cycle() {
    let fakes = Fakes::new();
    let manager = fakes.manager(CacheBuilder::new().with_tracked_markets(vec!["ETH".to_string()]));
    let _tasks = manager.start_schedulers().await.unwrap();

    let handle = manager.scheduler(Domain::Analysis).await.unwrap();
    let mut reports = handle.reports();

    // Start-up run over the tracked markets
    let startup = tokio::time::timeout(
        Duration::from_secs(5),
        reports.wait_for(|r| r.as_ref().is_some_and(|r| r.reason == RunReason::Startup)),
    )
    .await
    .expect("start-up run did not finish")
    .unwrap()
    .clone();
    assert_eq!(startup.unwrap().refreshed, 1);

    manager.trigger_scheduled_run(Domain::Analysis).await.unwrap();
    let manual = tokio::time::timeout(
        Duration::from_secs(5),
        reports.wait_for(|r| r.as_ref().is_some_and(|r| r.reason == RunReason::Manual)),
    )
    .await
    .expect("manual run did not finish")
    .unwrap()
    .clone();

    assert_eq!(manual.unwrap().keys, 1);
    assert_eq!(fakes.analysis.calls(), 2);
    // Other domains did not run
    assert_eq!(fakes.markets.calls(), 0);
}

#[tokio::test]
async fn test_repeated_triggers_are_collapsed() {
    let fakes = Fakes::with(
        FakeAdapter::new(Domain::Markets),
        FakeAdapter::new(Domain::Comments),
        FakeAdapter::new(Domain::Analysis).with_delay(Duration::from_millis(100)),
    );
    let manager = fakes.manager(CacheBuilder::new().with_tracked_markets(vec!["ETH".to_string()]));
    let _tasks = manager.start_schedulers().await.unwrap();

    for _ in 0..5 {
        manager.trigger_scheduled_run(Domain::Analysis).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Start-up run plus at most two manual runs
    let calls = fakes.analysis.calls();
    assert!((2..=3).contains(&calls), "unexpected analysis calls: {}", calls);

    let handle = manager.scheduler(Domain::Analysis).await.unwrap();
    assert_eq!(handle.state(), SchedulerState::Scheduled);
}

#[tokio::test(start_paused = true)]
async fn test_hot_keys_are_refreshed_before_expiry() {
    let fakes = Fakes::new();
    let manager = fakes.manager(
        CacheBuilder::new()
            .with_ttl(Domain::Markets, 4)
            .with_refresh_lead(Domain::Markets, Some(2))
            .with_sweep_interval(None),
    );

    manager.get_or_fetch(Domain::Markets, "bitcoin_market").await.unwrap();
    let _tasks = manager.start_schedulers().await.unwrap();

    // Refresh period is ttl - lead = 2s
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(fakes.markets.calls(), 2);

    // Past the original expiry, the refreshed entry is still served
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    let value = manager.get_or_fetch(Domain::Markets, "bitcoin_market").await.unwrap();
    assert!(stamp(&value) >= 2);

    let usage = manager.metrics_snapshot().await;
    let markets = usage.domain(Domain::Markets);
    assert_eq!(markets.counters.misses, 1);
    assert_eq!(markets.counters.hits, 1);
}

#[tokio::test]
async fn test_schedulers_start_once_and_stop_on_shutdown() {
    let fakes = Fakes::new();
    let manager = fakes.manager(CacheBuilder::new().with_tracked_markets(Vec::new()));

    let tasks = manager.start_schedulers().await.unwrap();
    // One scheduler per domain plus the sweeper
    assert_eq!(tasks.len(), 4);
    assert!(matches!(manager.start_schedulers().await, Err(CacheError::Config(_))));

    manager.shutdown().await;
    assert_eq!(
        manager.trigger_scheduled_run(Domain::Markets).await,
        Err(CacheError::SchedulerUnavailable { domain: Domain::Markets })
    );
}
