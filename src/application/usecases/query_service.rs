use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::{AppResult, Clock, HistoryQuery, TenantStore};
use crate::domain::{
    ActorId, BumpHistoryEntry, CooldownSettings, TenantConfig, TenantId, TimeRemaining,
};

pub const DEFAULT_HISTORY_LIMIT: u32 = 10;
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Snapshot answered by the status command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantStatus {
    pub tenant: TenantId,
    pub config: Option<TenantConfig>,
    pub remaining: TimeRemaining,
    pub last_actor: Option<ActorId>,
    pub last_bump: Option<DateTime<Utc>>,
    pub next_deadline: Option<DateTime<Utc>>,
}

/// Read-only answers over the tenant store. Missing tenants read as empty.
pub struct QueryService {
    store: Arc<dyn TenantStore>,
    clock: Arc<dyn Clock>,
    settings: CooldownSettings,
}

impl QueryService {
    pub fn new(store: Arc<dyn TenantStore>, clock: Arc<dyn Clock>, settings: CooldownSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub async fn time_remaining(&self, tenant: &TenantId) -> AppResult<TimeRemaining> {
        let slot = self.store.get_state(tenant).await?;
        Ok(self.settings.remaining(slot.state.as_ref(), self.clock.now()))
    }

    /// Most recent first; `limit` defaults to [`DEFAULT_HISTORY_LIMIT`].
    pub async fn history(
        &self,
        tenant: &TenantId,
        limit: Option<u32>,
    ) -> AppResult<Vec<BumpHistoryEntry>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        self.store
            .query_history(HistoryQuery {
                tenant: tenant.clone(),
                limit,
                actor: None,
            })
            .await
    }

    pub async fn count_by_actor(&self, tenant: &TenantId, actor: &ActorId) -> AppResult<u64> {
        self.store.count_history(tenant, actor).await
    }

    pub async fn status(&self, tenant: &TenantId) -> AppResult<TenantStatus> {
        let config = self.store.get_config(tenant).await?;
        let slot = self.store.get_state(tenant).await?;
        let remaining = self.settings.remaining(slot.state.as_ref(), self.clock.now());
        let state = slot.state;
        Ok(TenantStatus {
            tenant: tenant.clone(),
            config,
            remaining,
            next_deadline: state
                .as_ref()
                .map(|s| self.settings.deadline_after(s.last_bump)),
            last_bump: state.as_ref().map(|s| s.last_bump),
            last_actor: state.map(|s| s.last_actor),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::application::usecases::testing::t0;
    use crate::domain::CooldownState;
    use crate::infrastructure::clock::MonotonicClock;
    use crate::infrastructure::memory_store::InMemoryTenantStore;

    fn service(store: &InMemoryTenantStore) -> QueryService {
        QueryService::new(
            Arc::new(store.clone()),
            Arc::new(MonotonicClock::starting_at(t0())),
            CooldownSettings::new(Duration::from_secs(7200), Duration::from_secs(5)).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tenant_reads_as_empty() {
        let store = InMemoryTenantStore::new();
        let q = service(&store);
        let g = TenantId::parse("nobody").unwrap();

        assert_eq!(q.time_remaining(&g).await.unwrap(), TimeRemaining::Ready);
        assert!(q.history(&g, None).await.unwrap().is_empty());
        let actor = ActorId::parse("u1").unwrap();
        assert_eq!(q.count_by_actor(&g, &actor).await.unwrap(), 0);

        let status = q.status(&g).await.unwrap();
        assert!(status.config.is_none());
        assert!(status.last_actor.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_newest_first_and_bounded() {
        let store = InMemoryTenantStore::new();
        let g = TenantId::parse("g1").unwrap();
        for i in 0..12u64 {
            let at = t0() + TimeDelta::seconds(i as i64 * 8000);
            let state = CooldownState {
                tenant: g.clone(),
                generation: i + 1,
                last_bump: at,
                last_actor: ActorId::parse(&format!("u{i}")).unwrap(),
            };
            let entry = BumpHistoryEntry {
                tenant: g.clone(),
                actor: state.last_actor.clone(),
                at,
            };
            assert!(store.record_bump(i, &state, &entry).await.unwrap());
        }
        let q = service(&store);

        let recent = q.history(&g, None).await.unwrap();
        assert_eq!(recent.len(), DEFAULT_HISTORY_LIMIT as usize);
        assert_eq!(recent[0].actor.as_str(), "u11");
        assert_eq!(recent[9].actor.as_str(), "u2");

        let three = q.history(&g, Some(3)).await.unwrap();
        assert_eq!(three.len(), 3);
    }
}
