//! Owns the single pending reminder timer per tenant.
//!
//! ```text
//!        arm            timer matures, generation matches
//!  Idle ─────► Armed ─────────────────────────────────► Fired ──► Idle
//!   ▲            │ disarm / superseding arm
//!   └────────────┘
//! ```
//!
//! Cancelling a timer aborts its task, but a callback already past its sleep
//! cannot be stopped that way. Every firing therefore re-reads the stored
//! slot and only acts when the generation captured at arm time is still the
//! current one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::AbortHandle;

use crate::application::usecases::deliver;
use crate::application::{AppResult, Clock, Notifier, TenantStore};
use crate::domain::{Announcement, CooldownSettings, ReminderPolicy, TenantId};

/// How long a firing waits before re-checking after a store failure.
const STORE_RETRY_SECS: i64 = 30;

#[derive(Clone)]
pub struct ReminderDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TenantStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: CooldownSettings,
    policy: ReminderPolicy,
    pending: Mutex<HashMap<TenantId, PendingReminder>>,
}

struct PendingReminder {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: AbortHandle,
}

/// Read-only view of an armed timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmedReminder {
    pub generation: u64,
    pub fire_at: DateTime<Utc>,
}

/// Result of one timer maturing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireOutcome {
    Fired,
    Superseded,
    Retrying,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn TenantStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: CooldownSettings,
        policy: ReminderPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                notifier,
                clock,
                settings,
                policy,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Install the tenant's timer, cancelling whatever was armed before.
    ///
    /// Returns false when a timer for a newer generation is already armed;
    /// an `ingest` that committed earlier but arms later must not replace it.
    pub fn arm(&self, tenant: TenantId, generation: u64, fire_at: DateTime<Utc>) -> bool {
        self.inner.arm(tenant, generation, fire_at)
    }

    /// Cancel the tenant's timer if there is one.
    pub fn disarm(&self, tenant: &TenantId) {
        if let Some(old) = self.inner.pending().remove(tenant) {
            old.handle.abort();
            tracing::debug!(tenant = %tenant, generation = old.generation, "reminder disarmed");
        }
    }

    /// Re-arm a timer for every persisted cooldown. Deadlines already in the
    /// past fire on the next scheduler tick; under the repeat policy a
    /// deadline a whole interval or more behind waits for its next repeat.
    pub async fn restore(&self) -> AppResult<usize> {
        let states = self.inner.store.list_active_states().await?;
        let settings = &self.inner.settings;
        let now = self.inner.clock.now();
        let mut armed = 0;
        for state in states {
            let mut fire_at = settings.deadline_after(state.last_bump);
            if self.inner.policy == ReminderPolicy::Repeat && now - fire_at >= settings.interval() {
                fire_at = settings.next_repeat(fire_at, now);
            }
            if self.arm(state.tenant, state.generation, fire_at) {
                armed += 1;
            }
        }
        tracing::info!(armed, "reminders restored from stored cooldowns");
        Ok(armed)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub fn pending(&self, tenant: &TenantId) -> Option<ArmedReminder> {
        self.inner.pending().get(tenant).map(|p| ArmedReminder {
            generation: p.generation,
            fire_at: p.fire_at,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Abort every timer; used on process shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.inner.pending().drain().collect();
        for (_, reminder) in drained {
            reminder.handle.abort();
        }
    }
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<TenantId, PendingReminder>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>, tenant: TenantId, generation: u64, fire_at: DateTime<Utc>) -> bool {
        let mut pending = self.pending();
        if let Some(existing) = pending.get(&tenant) {
            if existing.generation > generation {
                tracing::debug!(
                    tenant = %tenant,
                    generation,
                    armed_generation = existing.generation,
                    "older reminder not armed over newer one"
                );
                return false;
            }
        }
        if let Some(old) = pending.remove(&tenant) {
            old.handle.abort();
        }

        let inner = Arc::clone(self);
        let task_tenant = tenant.clone();
        let task = tokio::spawn(async move {
            inner.clock.sleep_until(fire_at).await;
            inner.fire(task_tenant, generation, fire_at).await;
        });

        tracing::debug!(tenant = %tenant, generation, %fire_at, "reminder armed");
        pending.insert(
            tenant,
            PendingReminder {
                generation,
                fire_at,
                handle: task.abort_handle(),
            },
        );
        true
    }

    /// Drop the bookkeeping entry for a timer that has matured, unless it was
    /// already replaced.
    fn forget(&self, tenant: &TenantId, generation: u64, fire_at: DateTime<Utc>) {
        let mut pending = self.pending();
        if pending
            .get(tenant)
            .is_some_and(|p| p.generation == generation && p.fire_at == fire_at)
        {
            pending.remove(tenant);
        }
    }

    async fn fire(
        self: &Arc<Self>,
        tenant: TenantId,
        generation: u64,
        fire_at: DateTime<Utc>,
    ) -> FireOutcome {
        self.forget(&tenant, generation, fire_at);

        let slot = match self.store.get_state(&tenant).await {
            Ok(slot) => slot,
            Err(e) => return self.retry_later(tenant, generation, e.to_string()),
        };
        let Some(state) = slot.state.filter(|s| s.generation == generation) else {
            tracing::info!(tenant = %tenant, generation, "reminder superseded before firing");
            return FireOutcome::Superseded;
        };

        match self.policy {
            ReminderPolicy::Once => {
                match self
                    .store
                    .compare_and_swap_state(&tenant, generation, None)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::info!(tenant = %tenant, generation, "reminder superseded while firing");
                        return FireOutcome::Superseded;
                    }
                    Err(e) => return self.retry_later(tenant, generation, e.to_string()),
                }
            }
            ReminderPolicy::Repeat => {
                let next = self.settings.next_repeat(fire_at, self.clock.now());
                self.arm(tenant.clone(), generation, next);
            }
        }

        let config = match self.store.get_config(&tenant).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "config unavailable; reminder sent without targets");
                None
            }
        };
        let (target, escalation_target) = config
            .map(|c| (c.notification_target, c.escalation_target))
            .unwrap_or_default();

        let announcement = Announcement::Reminder {
            tenant: tenant.clone(),
            last_actor: state.last_actor,
            escalation_target,
            target,
        };
        deliver(self.notifier.as_ref(), &announcement).await;
        tracing::info!(tenant = %tenant, generation, "reminder fired");
        FireOutcome::Fired
    }

    fn retry_later(self: &Arc<Self>, tenant: TenantId, generation: u64, error: String) -> FireOutcome {
        let retry_at = self.clock.now() + TimeDelta::seconds(STORE_RETRY_SECS);
        tracing::warn!(tenant = %tenant, generation, %error, %retry_at, "store unavailable at fire time; retrying");
        self.arm(tenant, generation, retry_at);
        FireOutcome::Retrying
    }
}
