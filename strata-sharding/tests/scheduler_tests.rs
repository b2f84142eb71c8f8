//! Integration tests for the background scheduler.
//!
//! These run on a paused tokio clock, so sleeps advance time instantly.

use std::sync::Arc;
use std::time::Duration;
use strata_core::ShardingPattern;
use strata_sharding::{ShardingScheduler, TimeShardingManager, MIN_TICK_INTERVAL};
use strata_test_utils::fixtures::{self, march_5_2024};
use strata_test_utils::{CountingTableStore, FixedTimeSource, ScriptedLock};

const PERIOD: Duration = Duration::from_secs(60);

fn manager() -> (Arc<TimeShardingManager>, Arc<CountingTableStore>, Arc<FixedTimeSource>) {
    let store = CountingTableStore::shared();
    let clock = FixedTimeSource::shared(march_5_2024());
    let manager = TimeShardingManager::new(
        store.clone(),
        fixtures::test_sharding_config().with_tick_interval(PERIOD),
    )
    .expect("valid config")
    .with_lock(ScriptedLock::granting())
    .with_time_source(clock.clone());
    (Arc::new(manager), store, clock)
}

#[tokio::test(start_paused = true)]
async fn first_tick_waits_one_interval() {
    let (manager, _, _) = manager();
    let scheduler = ShardingScheduler::spawn(manager);

    tokio::time::sleep(PERIOD / 2).await;
    assert_eq!(scheduler.metrics().ticks, 0);

    tokio::time::sleep(PERIOD / 2 + Duration::from_secs(1)).await;
    assert_eq!(scheduler.metrics().ticks, 1);

    let snapshot = scheduler.stop().await;
    assert_eq!(snapshot.ticks, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_before_first_tick() {
    let (manager, store, _) = manager();
    manager
        .register(Arc::new(fixtures::daily_events()))
        .await
        .unwrap();
    let calls = store.calls();

    let scheduler = ShardingScheduler::spawn(manager);
    let snapshot = scheduler.stop().await;

    assert_eq!(snapshot.ticks, 0);
    assert_eq!(store.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn no_tick_after_stop() {
    let (manager, _, _) = manager();
    let scheduler = ShardingScheduler::spawn(manager.clone());

    tokio::time::sleep(PERIOD * 3 + Duration::from_secs(1)).await;
    let snapshot = scheduler.stop().await;
    assert_eq!(snapshot.ticks, 3);

    // Nothing is left running to tick again.
    tokio::time::sleep(PERIOD * 5).await;
    assert_eq!(Arc::strong_count(&manager), 1);
}

#[tokio::test(start_paused = true)]
async fn ticks_provision_new_periods_and_count_errors() {
    let (manager, store, clock) = manager();
    manager
        .register(Arc::new(fixtures::table("a", ShardingPattern::Daily)))
        .await
        .unwrap();
    manager
        .register(Arc::new(fixtures::table("b", ShardingPattern::Daily)))
        .await
        .unwrap();

    clock.advance(chrono::TimeDelta::days(1));
    store.fail_create_for("a_");

    let scheduler = ShardingScheduler::spawn(manager);
    tokio::time::sleep(PERIOD + Duration::from_secs(1)).await;
    let snapshot = scheduler.stop().await;

    assert_eq!(snapshot.ticks, 1);
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.provisioned, 1);
    assert_eq!(snapshot.tables_created, 1);
    assert!(store.table_names().contains(&"b_20240307".to_string()));
}

#[tokio::test(start_paused = true)]
async fn zero_interval_runs_at_minimum() {
    let (manager, _, _) = manager();
    let scheduler = ShardingScheduler::spawn_with_interval(manager, Duration::ZERO);

    tokio::time::sleep(MIN_TICK_INTERVAL * 3 + MIN_TICK_INTERVAL / 2).await;
    assert!(!scheduler.is_finished());

    let snapshot = scheduler.stop().await;
    assert_eq!(snapshot.ticks, 3);
}
