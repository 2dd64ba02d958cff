mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

use bumpwatch::application::{Clock, TenantStore};
use bumpwatch::application::usecases::{DedupReason, IngestOutcome, ResetOutcome};
use bumpwatch::domain::TimeRemaining;
use bumpwatch::infrastructure::clock::MonotonicClock;
use bumpwatch::infrastructure::sqlite_store::SqliteTenantStore;

use common::{Harness, actor, settings, tenant};

// sqlx pool timers do not mix with a paused runtime, so these run in real time

async fn sqlite() -> Arc<dyn TenantStore> {
    Arc::new(SqliteTenantStore::new("sqlite::memory:").await.unwrap())
}

fn process(store: &Arc<dyn TenantStore>, interval: Duration, tolerance: Duration) -> Harness {
    Harness::start_on(
        store.clone(),
        Arc::new(MonotonicClock::new()),
        settings(interval, tolerance),
    )
}

/// A recent instant with sub-millisecond digits, as relay timestamps carry.
fn recent_precise() -> DateTime<Utc> {
    (Utc::now() - TimeDelta::seconds(10)).trunc_subsecs(0)
        + TimeDelta::microseconds(123_456)
        + TimeDelta::nanoseconds(789)
}

#[tokio::test]
async fn exact_reobservation_is_one_bump_without_tolerance() {
    let store = sqlite().await;
    let h = process(&store, Duration::from_secs(3600), Duration::ZERO);
    let g1 = tenant("G1");
    let at = recent_precise();

    assert!(matches!(h.bump("G1", "U1", at).await, IngestOutcome::Accepted(_)));
    assert_eq!(
        h.bump("G1", "U1", at).await,
        IngestOutcome::Deduplicated(DedupReason::WithinTolerance)
    );
    assert_eq!(
        h.bump("G1", "U1", at - TimeDelta::seconds(1)).await,
        IngestOutcome::Stale
    );

    assert_eq!(h.queries.count_by_actor(&g1, &actor("U1")).await.unwrap(), 1);
    assert_eq!(h.store.get_state(&g1).await.unwrap().generation, 1);
}

#[tokio::test]
async fn reset_then_fresh_bump() {
    let store = sqlite().await;
    let h = process(&store, Duration::from_secs(3600), Duration::from_secs(5));
    let g1 = tenant("G1");
    let first = Utc::now() - TimeDelta::seconds(120);

    h.bump("G1", "U1", first).await;
    assert!(matches!(
        h.queries.time_remaining(&g1).await.unwrap(),
        TimeRemaining::Waiting(_)
    ));

    assert_eq!(h.engine.reset(&g1, None).await.unwrap(), ResetOutcome::Cleared);
    assert_eq!(h.queries.time_remaining(&g1).await.unwrap(), TimeRemaining::Ready);
    assert!(h.engine.dispatcher().pending(&g1).is_none());

    // the cleared bump seen again by a later scan stays a duplicate
    assert!(matches!(
        h.bump("G1", "U1", first).await,
        IngestOutcome::Deduplicated(_)
    ));

    let now = h.engine.dispatcher().clock().now();
    let outcome = h.bump("G1", "U2", now).await;
    assert!(matches!(outcome, IngestOutcome::Accepted(a) if a.generation == 2));
    assert_eq!(h.queries.history(&g1, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn restart_restores_and_fires_once() {
    let store = sqlite().await;
    let g1 = tenant("G1");
    let interval = Duration::from_secs(1);

    let before = process(&store, interval, Duration::ZERO);
    let now = before.engine.dispatcher().clock().now();
    assert!(matches!(before.bump("G1", "U1", now).await, IngestOutcome::Accepted(_)));
    before.engine.dispatcher().shutdown();

    let after = process(&store, interval, Duration::ZERO);
    assert_eq!(after.engine.dispatcher().restore().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(before.notifier.reminders().is_empty());
    assert_eq!(after.notifier.reminders().len(), 1);
    assert!(store.get_state(&g1).await.unwrap().state.is_none());
    assert_eq!(after.engine.dispatcher().pending_count(), 0);

    // a second restart finds nothing left to fire
    let again = process(&store, interval, Duration::ZERO);
    assert_eq!(again.engine.dispatcher().restore().await.unwrap(), 0);
}
