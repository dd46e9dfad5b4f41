//! End-to-end push and pull scenarios against the mock remote.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stocksync_core::{ChangeEvent, DropReason, EnqueueOutcome, MutationQueue, Record};
use stocksync_sync_engine::{EngineState, SyncEvent, SyncOutcome};
use stocksync_testkit::prelude::*;

const WAIT: Duration = Duration::from_secs(2);

fn pending(t: &TestEngine, domain: &str) -> usize {
    t.engine
        .stats()
        .domain(domain)
        .map(|d| d.queue.len)
        .unwrap_or(0)
}

#[tokio::test]
async fn offline_write_is_delivered_after_reconnect() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    t.engine.start().await.unwrap();

    let outcome = t
        .engine
        .write("products", Record::new().with("code", "X1"))
        .unwrap();
    assert!(outcome.is_enqueued());
    assert_eq!(pending(&t, "products"), 1);
    assert_eq!(t.remote.attempts(), 0);

    t.engine.set_online(true);
    t.engine.drain("products").await.unwrap();

    assert_eq!(t.remote.upserted_keys("products"), vec!["X1"]);
    assert_eq!(pending(&t, "products"), 0);
}

#[tokio::test]
async fn failed_head_blocks_the_rest() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    t.engine.start().await.unwrap();

    t.engine.write("products", Record::new().with("code", "A")).unwrap();
    t.engine.write("products", Record::new().with("code", "B")).unwrap();
    t.remote.reject_key("A");

    t.engine.set_online(true);
    let report = t.engine.drain("products").await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.remaining, 2);
    assert!(t.remote.upserted_keys("products").is_empty());
    assert!(t
        .remote
        .attempted_keys("products")
        .iter()
        .all(|k| k == "A"));

    let queue = MutationQueue::open(env.kv.clone(), "products").unwrap();
    let codes: Vec<_> = queue
        .snapshot()
        .iter()
        .map(|m| m.record().key_for("code").unwrap())
        .collect();
    assert_eq!(codes, vec!["A", "B"]);

    assert!(t.notifier.outcomes().iter().any(|o| matches!(
        o,
        SyncOutcome::Failed { remaining: 2, processed: 0, .. }
    )));

    t.remote.heal();
    let report = t.engine.drain("products").await.unwrap();
    assert!(report.is_success());
    assert_eq!(t.remote.upserted_keys("products"), vec!["A", "B"]);
}

#[tokio::test]
async fn remote_update_overwrites_local_record() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    let mut events = t.engine.subscribe();
    t.engine.start().await.unwrap();

    t.engine
        .store()
        .put("products", product("P1", "Old"))
        .unwrap();
    let delivered = t.remote.emit(ChangeEvent::update(
        "products",
        None,
        product("P1", "New").with("area_id", TEST_SCOPE),
    ));
    assert_eq!(delivered, 1);

    let applied = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, SyncEvent::RemoteChangeApplied { key, .. } if key == "P1")
    })
    .await;
    assert!(applied.is_some());

    let record = t.engine.store().get("products", "P1").unwrap().unwrap();
    assert_eq!(record.get("name"), Some(&json!("New")));
}

#[tokio::test]
async fn remote_delete_removes_local_record() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    let mut events = t.engine.subscribe();
    t.engine.start().await.unwrap();

    t.engine
        .store()
        .put("inventory", Record::new().with("code", "I1"))
        .unwrap();
    t.remote
        .emit(ChangeEvent::delete("inventory", Record::new().with("code", "I1")));

    let applied = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, SyncEvent::RemoteChangeApplied { domain, .. } if domain == "inventory")
    })
    .await;
    assert!(applied.is_some());
    assert_eq!(t.engine.store().get("inventory", "I1").unwrap(), None);
}

#[tokio::test]
async fn domains_drain_concurrently_in_order() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    t.engine.start().await.unwrap();

    for code in ["P1", "P2", "P3"] {
        t.engine.write("products", Record::new().with("code", code)).unwrap();
    }
    for code in ["I1", "I2"] {
        t.engine.write("inventory", Record::new().with("code", code)).unwrap();
    }
    t.remote.set_latency(Some(Duration::from_millis(20)));

    t.engine.set_online(true);
    let reports = t.engine.drain_all().await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_success()));

    assert!(eventually(WAIT, || t.engine.stats().pending_total() == 0).await);
    assert_eq!(t.remote.upserted_keys("products"), vec!["P1", "P2", "P3"]);
    assert_eq!(t.remote.upserted_keys("inventory"), vec!["I1", "I2"]);
    assert_eq!(t.remote.max_concurrency("products"), 1);
    assert_eq!(t.remote.max_concurrency("inventory"), 1);
}

#[tokio::test]
async fn write_without_scope_stays_local() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    let mut events = t.engine.subscribe();
    t.engine.start().await.unwrap();
    t.scope.set(None);

    let outcome = t
        .engine
        .write("products", Record::new().with("code", "X9"))
        .unwrap();

    assert_eq!(outcome, EnqueueOutcome::Dropped(DropReason::ScopeMissing));
    assert_eq!(pending(&t, "products"), 0);
    assert!(t.engine.store().get("products", "X9").unwrap().is_some());

    let dropped = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, SyncEvent::MutationDropped { .. })
    })
    .await;
    assert!(dropped.is_some());
}

#[tokio::test]
async fn outbound_record_is_cleaned_and_scoped() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    t.engine.start().await.unwrap();

    t.engine
        .write(
            "products",
            product("P1", "Bolt").with("areaName", "North").with("is_temp_id", true),
        )
        .unwrap();
    t.engine.set_online(true);
    t.engine.drain("products").await.unwrap();

    let sent = t.remote.server_record("products", "P1").unwrap();
    assert!(!sent.contains("areaName"));
    assert!(!sent.contains("is_temp_id"));
    assert_eq!(sent.get("area_id"), Some(&json!(TEST_SCOPE)));

    let local = t.engine.store().get("products", "P1").unwrap().unwrap();
    assert!(local.contains("areaName"));
}

#[tokio::test]
async fn lost_subscription_is_restored_on_reconnect() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    let mut events = t.engine.subscribe();
    t.engine.start().await.unwrap();
    assert_eq!(t.remote.active_subscriptions("products"), 1);

    t.remote.drop_subscriptions("products");
    let lost = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, SyncEvent::SubscriptionLost { domain } if domain == "products")
    })
    .await;
    assert!(lost.is_some());
    assert!(!t.engine.stats().domain("products").unwrap().subscribed);

    t.engine.set_online(true);
    let restored = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, SyncEvent::Resubscribed { domain } if domain == "products")
    })
    .await;
    assert!(restored.is_some());
    assert_eq!(t.remote.active_subscriptions("products"), 1);
    assert!(t.engine.stats().domain("products").unwrap().subscribed);
}

#[tokio::test]
async fn timer_retries_failed_drains() {
    let env = TestEnv::memory();
    let config = test_config()
        .with_initially_online(true)
        .with_drain_interval(Duration::from_millis(20));
    let t = TestEngine::new(config, env.kv.clone());
    t.engine.start().await.unwrap();

    t.remote.fail_next(1);
    t.engine.write("products", Record::new().with("code", "A")).unwrap();

    assert!(eventually(WAIT, || t.remote.upserted_keys("products") == vec!["A"]).await);
    assert!(t.remote.attempts() >= 2);
}

#[tokio::test]
async fn schema_downgrade_degrades_engine() {
    let env = TestEnv::memory();
    {
        let newer = stocksync_sync_engine::SyncConfig::new()
            .with_domain(products_schema().with_version(3));
        let t = TestEngine::new(newer, env.kv.clone());
        t.engine.start().await.unwrap();
        t.engine.shutdown().await.unwrap();
    }

    let t = TestEngine::new(test_config(), env.kv.clone());
    let err = t.engine.start().await.unwrap_err();
    assert!(matches!(
        err,
        stocksync_sync_engine::SyncError::SchemaUpgradeFailed { .. }
    ));
    assert_eq!(t.engine.state(), EngineState::Degraded);
    assert!(t
        .engine
        .write("products", Record::new().with("code", "A"))
        .is_err());
}

#[tokio::test]
async fn lifecycle_gates_writes() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    let mut events = t.engine.subscribe();

    assert!(t
        .engine
        .write("products", Record::new().with("code", "A"))
        .is_err());

    t.engine.start().await.unwrap();
    assert_eq!(t.engine.state(), EngineState::Ready);
    assert!(t.engine.start().await.is_err());
    assert!(t.engine.trigger_push("batches").is_err());

    t.engine.shutdown().await.unwrap();
    assert_eq!(t.engine.state(), EngineState::Stopped);
    assert!(t.engine.trigger_push("products").is_err());
    assert!(t.engine.shutdown().await.is_err());
    assert_eq!(t.remote.active_subscriptions("products"), 0);

    let ready = wait_for_event(&mut events, WAIT, |e| {
        matches!(
            e,
            SyncEvent::StateChanged {
                to: EngineState::Ready,
                ..
            }
        )
    })
    .await;
    assert!(ready.is_some());
}

#[tokio::test]
async fn shutdown_abandons_slow_upsert_but_keeps_it_queued() {
    let env = TestEnv::memory();
    let config = test_config().with_shutdown_timeout(Duration::from_millis(50));
    let t = TestEngine::new(config, env.kv.clone());
    t.engine.start().await.unwrap();

    t.remote.set_latency(Some(Duration::from_secs(30)));
    t.engine.write("products", Record::new().with("code", "A")).unwrap();
    t.engine.set_online(true);
    assert!(eventually(WAIT, || t.remote.attempts() == 1).await);

    tokio::time::timeout(Duration::from_secs(5), t.engine.shutdown())
        .await
        .expect("shutdown must not wait for the slow upsert")
        .unwrap();

    let queue = MutationQueue::open(env.kv.clone(), "products").unwrap();
    assert_eq!(queue.len(), 1);
    assert!(t.remote.upserted_keys("products").is_empty());
}

#[tokio::test]
async fn file_queue_survives_restart() {
    let mut env = TestEnv::file();
    let remote = Arc::new(MockRemote::new());
    {
        let t = TestEngine::with_remote(test_config(), env.kv.clone(), Arc::clone(&remote));
        t.engine.start().await.unwrap();
        t.engine.write("products", Record::new().with("code", "A")).unwrap();
        t.engine.write("products", Record::new().with("code", "B")).unwrap();
        t.engine.shutdown().await.unwrap();
    }
    env.reopen();

    let t = TestEngine::with_remote(test_config(), env.kv.clone(), Arc::clone(&remote));
    t.engine.start().await.unwrap();
    assert_eq!(t.engine.stats().pending_total(), 2);
    assert_eq!(t.engine.store().count("products").unwrap(), 2);

    t.engine.set_online(true);
    t.engine.drain("products").await.unwrap();
    assert_eq!(remote.upserted_keys("products"), vec!["A", "B"]);
}

#[tokio::test]
async fn going_online_right_after_start_drains_without_asking() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    let mut events = t.engine.subscribe();
    t.engine.start().await.unwrap();

    t.engine.write("products", Record::new().with("code", "X1")).unwrap();
    t.engine.set_online(true);

    assert!(eventually(WAIT, || t.remote.upserted_keys("products") == vec!["X1"]).await);
    let changed = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, SyncEvent::ConnectivityChanged { online: true })
    })
    .await;
    assert!(changed.is_some());
}

#[tokio::test]
async fn offline_cycle_does_not_count_as_a_drain() {
    let env = TestEnv::memory();
    let t = TestEngine::new(test_config(), env.kv.clone());
    t.engine.start().await.unwrap();

    t.engine.write("products", Record::new().with("code", "A")).unwrap();
    let report = t.engine.drain("products").await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.processed, 0);
    assert_eq!(
        t.engine.stats().domain("products").unwrap().last_drain_ms,
        None
    );

    t.engine.set_online(true);
    let report = t.engine.drain("products").await.unwrap();
    assert!(report.is_success());
    assert!(!report.interrupted);
    assert!(t
        .engine
        .stats()
        .domain("products")
        .unwrap()
        .last_drain_ms
        .is_some());
}
