mod common;

use std::time::Duration;

use bumpwatch::application::TenantStore;
use bumpwatch::domain::TimeRemaining;
use bumpwatch::infrastructure::memory_store::InMemoryTenantStore;

use common::{Harness, INTERVAL_SECS, at, t0, tenant};

#[tokio::test(start_paused = true)]
async fn restarted_process_fires_pending_reminder_once() {
    let store = InMemoryTenantStore::new();
    let g1 = tenant("G1");

    let before = Harness::start(store.clone(), t0());
    before.bump("G1", "U1", t0()).await;
    tokio::time::sleep(Duration::from_secs(1800)).await;

    // process dies: its timers go with it
    before.engine.dispatcher().shutdown();

    let after = Harness::start(store.clone(), at(1800));
    assert_eq!(after.engine.dispatcher().restore().await.unwrap(), 1);
    assert_eq!(
        after.engine.dispatcher().pending(&g1).map(|p| p.fire_at),
        Some(at(INTERVAL_SECS as i64))
    );

    tokio::time::sleep(Duration::from_secs(INTERVAL_SECS - 1800 + 1)).await;
    assert!(before.notifier.reminders().is_empty());
    assert_eq!(after.notifier.reminders().len(), 1);
    assert_eq!(
        after.queries.time_remaining(&g1).await.unwrap(),
        TimeRemaining::Ready
    );

    tokio::time::sleep(Duration::from_secs(INTERVAL_SECS)).await;
    assert_eq!(after.notifier.reminders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_missed_while_down_fires_on_restore() {
    let store = InMemoryTenantStore::new();
    let g1 = tenant("G1");

    let before = Harness::start(store.clone(), t0());
    before.bump("G1", "U1", t0()).await;
    before.engine.dispatcher().shutdown();

    let after = Harness::start(store.clone(), at(INTERVAL_SECS as i64 + 600));
    after.engine.dispatcher().restore().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(after.notifier.reminders().len(), 1);
    assert!(store.get_state(&g1).await.unwrap().state.is_none());
}

#[tokio::test(start_paused = true)]
async fn restore_after_fire_arms_nothing() {
    let store = InMemoryTenantStore::new();

    let before = Harness::start(store.clone(), t0());
    before.bump("G1", "U1", t0()).await;
    tokio::time::sleep(Duration::from_secs(INTERVAL_SECS + 1)).await;
    assert_eq!(before.notifier.reminders().len(), 1);
    before.engine.dispatcher().shutdown();

    let after = Harness::start(store, at(INTERVAL_SECS as i64 + 1));
    assert_eq!(after.engine.dispatcher().restore().await.unwrap(), 0);
    assert_eq!(after.engine.dispatcher().pending_count(), 0);
}
