#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use bumpwatch::application::usecases::{
    CooldownEngine, IngestOutcome, QueryService, ReminderDispatcher,
};
use bumpwatch::application::{AppResult, Notifier, TenantStore};
use bumpwatch::domain::{
    ActorId, Announcement, BumpObservation, CooldownSettings, ReminderPolicy, TenantId,
};
use bumpwatch::infrastructure::clock::MonotonicClock;
use bumpwatch::infrastructure::memory_store::InMemoryTenantStore;

pub const INTERVAL_SECS: u64 = 7200;

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(secs)
}

pub fn tenant(s: &str) -> TenantId {
    TenantId::parse(s).unwrap()
}

pub fn actor(s: &str) -> ActorId {
    ActorId::parse(s).unwrap()
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<Announcement>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reminders(&self) -> Vec<Announcement> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|a| matches!(a, Announcement::Reminder { .. }))
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.kind() == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, announcement: &Announcement) -> AppResult<()> {
        self.seen.lock().unwrap().push(announcement.clone());
        Ok(())
    }
}

/// One "process": engine, dispatcher and queries over a shared store.
pub struct Harness {
    pub store: Arc<dyn TenantStore>,
    pub notifier: RecordingNotifier,
    pub engine: CooldownEngine,
    pub queries: QueryService,
}

pub fn settings(interval: Duration, tolerance: Duration) -> CooldownSettings {
    CooldownSettings::new(interval, tolerance).unwrap()
}

impl Harness {
    pub fn start(store: InMemoryTenantStore, wall: DateTime<Utc>) -> Self {
        Self::start_on(
            Arc::new(store),
            Arc::new(MonotonicClock::starting_at(wall)),
            settings(Duration::from_secs(INTERVAL_SECS), Duration::from_secs(5)),
        )
    }

    pub fn start_on(
        store: Arc<dyn TenantStore>,
        clock: Arc<MonotonicClock>,
        settings: CooldownSettings,
    ) -> Self {
        let notifier = RecordingNotifier::new();
        let dispatcher = ReminderDispatcher::new(
            store.clone(),
            Arc::new(notifier.clone()),
            clock.clone(),
            settings,
            ReminderPolicy::Once,
        );
        let engine = CooldownEngine::new(
            store.clone(),
            Arc::new(notifier.clone()),
            dispatcher,
            settings,
        );
        let queries = QueryService::new(store.clone(), clock, settings);
        Self {
            store,
            notifier,
            engine,
            queries,
        }
    }

    pub async fn bump(&self, tenant_id: &str, actor_id: &str, observed_at: DateTime<Utc>) -> IngestOutcome {
        self.engine
            .ingest(BumpObservation {
                tenant: tenant(tenant_id),
                actor: actor(actor_id),
                observed_at,
                pass: None,
            })
            .await
            .unwrap()
    }
}
