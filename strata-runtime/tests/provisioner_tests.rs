//! End-to-end provisioning over in-memory stores.

use std::sync::Arc;
use std::time::Duration;
use strata_runtime::provisioner::{build_manager, run_until};
use strata_runtime::{RuntimeConfig, TablesFile};
use strata_core::CacheConfig;
use strata_storage::{KvDistributedLock, RedisQueryCache};
use strata_test_utils::fixtures;
use strata_test_utils::{CountingTableStore, InMemoryKeyValueStore, NoopLock};

const TABLES: &str = r#"
[[tables]]
org_name = "events"
sharding = "daily"
shape = "id BIGINT"

[[tables]]
org_name = "audit"
sharding = "%Y%m"
shape = "id BIGINT"
"#;

fn runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        sharding: fixtures::test_sharding_config().with_tick_interval(Duration::from_secs(60)),
        ..Default::default()
    }
}

#[tokio::test]
async fn registers_every_table_from_file() {
    let file = TablesFile::parse(TABLES).unwrap();
    let store = CountingTableStore::shared();

    let manager = build_manager(&runtime_config(), store.clone(), Arc::new(NoopLock), file.tables)
        .await
        .unwrap();

    assert_eq!(manager.managed_tables().len(), 2);
    // Current and next period for each table.
    assert_eq!(store.table_names().len(), 4);
    assert!(manager.current_table_name("events").unwrap().unwrap().starts_with("events_"));
    assert!(manager.current_table_name("audit").unwrap().unwrap().starts_with("audit_"));
}

#[tokio::test]
async fn registration_error_stops_build() {
    let file = TablesFile::parse(TABLES).unwrap();
    let store = CountingTableStore::shared();
    store.fail_create_for("audit");

    let result = build_manager(&runtime_config(), store.clone(), Arc::new(NoopLock), file.tables).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn shared_kv_lock_is_released_after_registration() {
    let file = TablesFile::parse(TABLES).unwrap();
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let lock = Arc::new(KvDistributedLock::new(kv.clone()));

    build_manager(&runtime_config(), CountingTableStore::shared(), lock, file.tables)
        .await
        .unwrap();

    assert!(kv.is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_until_ticks_then_stops() {
    let file = TablesFile::parse(TABLES).unwrap();
    let manager = build_manager(
        &runtime_config(),
        CountingTableStore::shared(),
        Arc::new(NoopLock),
        file.tables,
    )
    .await
    .unwrap();

    let snapshot = run_until(manager, tokio::time::sleep(Duration::from_secs(150))).await;
    assert_eq!(snapshot.ticks, 2);
    assert_eq!(snapshot.errors, 0);
}

#[tokio::test]
async fn engine_cache_over_memory_store() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let cache = RedisQueryCache::new(kv, CacheConfig::default()).unwrap();
    let engine = strata_runtime::Engine::new(
        "primary",
        CountingTableStore::shared(),
        Some(Arc::new(cache)),
    )
    .unwrap();

    let cache = engine.cache().unwrap();
    cache.put_bean("users", "7", &"alice".to_string()).await;
    let hit: Option<String> = cache.get_bean("users", "7").await;
    assert_eq!(hit.as_deref(), Some("alice"));
}
