use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SubsecRound, Utc};

use crate::application::usecases::{ReminderDispatcher, deliver};
use crate::application::{AppError, AppResult, Clock, HistoryQuery, Notifier, TenantStore};
use crate::domain::{
    ActorId, Admission, Announcement, BumpHistoryEntry, BumpObservation, ConfigPatch,
    CooldownSettings, CooldownState, PassId, TenantId, watermark,
};

/// Compare-and-set rounds before giving up on a tenant under contention.
const MAX_COMMIT_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(AcceptedBump),
    Deduplicated(DedupReason),
    /// Older than the tenant's newest recorded bump; ignored.
    Stale,
    /// Timestamped ahead of the clock; ignored.
    FromFuture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcceptedBump {
    pub generation: u64,
    pub next_deadline: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DedupReason {
    WithinTolerance,
    SamePass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    Cleared,
    NothingActive,
}

/// The per-tenant bump state machine. Every detector feeds it; it alone
/// decides what counts as a new bump.
pub struct CooldownEngine {
    store: Arc<dyn TenantStore>,
    notifier: Arc<dyn Notifier>,
    dispatcher: ReminderDispatcher,
    settings: CooldownSettings,
    accepted_passes: Mutex<HashMap<TenantId, PassId>>,
}

impl CooldownEngine {
    pub fn new(
        store: Arc<dyn TenantStore>,
        notifier: Arc<dyn Notifier>,
        dispatcher: ReminderDispatcher,
        settings: CooldownSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            dispatcher,
            settings,
            accepted_passes: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &ReminderDispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> &CooldownSettings {
        &self.settings
    }

    /// Record a bump exactly once and schedule its reminder.
    ///
    /// Only store failures are returned as errors; duplicates and stale
    /// observations resolve to a no-op outcome.
    pub async fn ingest(&self, bump: BumpObservation) -> AppResult<IngestOutcome> {
        let BumpObservation {
            tenant,
            actor,
            observed_at,
            pass,
        } = bump;
        // stores keep microseconds; compare what will be persisted
        let observed_at = observed_at.trunc_subsecs(6);

        if let Some(pass) = pass {
            if self.pass_already_accepted(&tenant, pass) {
                tracing::debug!(tenant = %tenant, %pass, "bump from an already accepted pass");
                return Ok(IngestOutcome::Deduplicated(DedupReason::SamePass));
            }
        }

        let target = match self.store.get_config(&tenant).await? {
            Some(config) => config.notification_target,
            None => {
                self.store
                    .put_config(&tenant, &ConfigPatch::default())
                    .await?;
                None
            }
        };

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let slot = self.store.get_state(&tenant).await?;
            let newest = self
                .store
                .query_history(HistoryQuery {
                    tenant: tenant.clone(),
                    limit: 1,
                    actor: None,
                })
                .await?;

            let now = self.dispatcher.clock().now();
            match self
                .settings
                .admit(observed_at, watermark(&slot, newest.first()), now)
            {
                Admission::Accept => {}
                Admission::Duplicate => {
                    tracing::debug!(tenant = %tenant, actor = %actor, %observed_at, "duplicate bump");
                    return Ok(IngestOutcome::Deduplicated(DedupReason::WithinTolerance));
                }
                Admission::Stale => {
                    tracing::debug!(tenant = %tenant, actor = %actor, %observed_at, "stale bump ignored");
                    return Ok(IngestOutcome::Stale);
                }
                Admission::FromFuture => {
                    tracing::warn!(tenant = %tenant, actor = %actor, %observed_at, %now, "bump from the future ignored");
                    return Ok(IngestOutcome::FromFuture);
                }
            }

            let state = CooldownState {
                tenant: tenant.clone(),
                generation: slot.generation + 1,
                last_bump: observed_at,
                last_actor: actor.clone(),
            };
            let entry = BumpHistoryEntry {
                tenant: tenant.clone(),
                actor: actor.clone(),
                at: observed_at,
            };
            if !self
                .store
                .record_bump(slot.generation, &state, &entry)
                .await?
            {
                tracing::debug!(tenant = %tenant, attempt, "cooldown changed underneath; re-reading");
                continue;
            }

            if let Some(pass) = pass {
                self.remember_pass(&tenant, pass);
            }
            let next_deadline = self.settings.deadline_after(observed_at);
            self.dispatcher
                .arm(tenant.clone(), state.generation, next_deadline);

            tracing::info!(
                tenant = %tenant,
                actor = %actor,
                generation = state.generation,
                %next_deadline,
                "bump accepted"
            );
            let announcement = Announcement::Bump {
                tenant,
                actor,
                next_deadline,
                target,
            };
            deliver(self.notifier.as_ref(), &announcement).await;

            return Ok(IngestOutcome::Accepted(AcceptedBump {
                generation: state.generation,
                next_deadline,
            }));
        }

        Err(AppError::StoreUnavailable(format!(
            "cooldown for tenant {tenant} kept changing; try again"
        )))
    }

    /// Drop the live cooldown and its pending reminder. History is kept.
    pub async fn reset(&self, tenant: &TenantId, by: Option<ActorId>) -> AppResult<ResetOutcome> {
        let target = self
            .store
            .get_config(tenant)
            .await?
            .and_then(|c| c.notification_target);

        let mut outcome = None;
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let slot = self.store.get_state(tenant).await?;
            if slot.state.is_none() {
                outcome = Some(ResetOutcome::NothingActive);
                break;
            }
            if self
                .store
                .compare_and_swap_state(tenant, slot.generation, None)
                .await?
            {
                outcome = Some(ResetOutcome::Cleared);
                break;
            }
            tracing::debug!(tenant = %tenant, attempt, "cooldown changed during reset; re-reading");
        }
        let Some(outcome) = outcome else {
            return Err(AppError::StoreUnavailable(format!(
                "cooldown for tenant {tenant} kept changing; try again"
            )));
        };

        self.dispatcher.disarm(tenant);
        tracing::info!(tenant = %tenant, ?outcome, "cooldown reset");
        let announcement = Announcement::Reset {
            tenant: tenant.clone(),
            by,
            target,
        };
        deliver(self.notifier.as_ref(), &announcement).await;
        Ok(outcome)
    }

    fn pass_already_accepted(&self, tenant: &TenantId, pass: PassId) -> bool {
        let passes = self
            .accepted_passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        passes.get(tenant) == Some(&pass)
    }

    fn remember_pass(&self, tenant: &TenantId, pass: PassId) {
        self.accepted_passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant.clone(), pass);
    }
}
