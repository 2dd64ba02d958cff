use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::application::{AppError, AppResult, HistoryQuery, TenantStore};
use crate::domain::{
    ActorId, BumpHistoryEntry, ConfigPatch, CooldownState, StateSlot, TenantConfig, TenantId,
};

/// Process-local store. One mutex covers every map, so each trait call is
/// atomic per tenant and `record_bump` is atomic as a whole.
#[derive(Clone, Default)]
pub struct InMemoryTenantStore {
    inner: Arc<Mutex<Inner>>,
    unavailable: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    configs: HashMap<TenantId, TenantConfig>,
    slots: HashMap<TenantId, StateSlot>,
    // append order == time order for accepted bumps
    history: Vec<BumpHistoryEntry>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreUnavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Inner>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("in-memory store offline".into()));
        }
        self.inner
            .lock()
            .map_err(|_| AppError::StoreUnavailable("lock poisoned".into()))
    }
}

impl Inner {
    fn swap(
        &mut self,
        tenant: &TenantId,
        expected_generation: u64,
        new_state: Option<&CooldownState>,
    ) -> bool {
        let slot = self.slots.entry(tenant.clone()).or_default();
        if slot.generation != expected_generation {
            return false;
        }
        match new_state {
            Some(state) if state.generation <= expected_generation => false,
            Some(state) => {
                slot.generation = state.generation;
                slot.state = Some(state.clone());
                true
            }
            None => {
                slot.state = None;
                true
            }
        }
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get_config(&self, tenant: &TenantId) -> AppResult<Option<TenantConfig>> {
        let inner = self.lock()?;
        Ok(inner.configs.get(tenant).cloned())
    }

    async fn put_config(&self, tenant: &TenantId, patch: &ConfigPatch) -> AppResult<TenantConfig> {
        let mut inner = self.lock()?;
        let config = inner
            .configs
            .entry(tenant.clone())
            .or_insert_with(|| TenantConfig::new(tenant.clone()));
        config.apply(patch);
        Ok(config.clone())
    }

    async fn list_configs(&self) -> AppResult<Vec<TenantConfig>> {
        let inner = self.lock()?;
        let mut v: Vec<_> = inner.configs.values().cloned().collect();
        v.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        Ok(v)
    }

    async fn get_state(&self, tenant: &TenantId) -> AppResult<StateSlot> {
        let inner = self.lock()?;
        Ok(inner.slots.get(tenant).cloned().unwrap_or_default())
    }

    async fn compare_and_swap_state(
        &self,
        tenant: &TenantId,
        expected_generation: u64,
        new_state: Option<&CooldownState>,
    ) -> AppResult<bool> {
        let mut inner = self.lock()?;
        Ok(inner.swap(tenant, expected_generation, new_state))
    }

    async fn record_bump(
        &self,
        expected_generation: u64,
        state: &CooldownState,
        entry: &BumpHistoryEntry,
    ) -> AppResult<bool> {
        let mut inner = self.lock()?;
        if !inner.swap(&state.tenant, expected_generation, Some(state)) {
            return Ok(false);
        }
        inner.history.push(entry.clone());
        Ok(true)
    }

    async fn list_active_states(&self) -> AppResult<Vec<CooldownState>> {
        let inner = self.lock()?;
        Ok(inner
            .slots
            .values()
            .filter_map(|slot| slot.state.clone())
            .collect())
    }

    async fn query_history(&self, query: HistoryQuery) -> AppResult<Vec<BumpHistoryEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .history
            .iter()
            .rev() // newest first (since we push at end)
            .filter(|e| e.tenant == query.tenant)
            .filter(|e| query.actor.as_ref().is_none_or(|a| &e.actor == a))
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn count_history(&self, tenant: &TenantId, actor: &ActorId) -> AppResult<u64> {
        let inner = self.lock()?;
        let n = inner
            .history
            .iter()
            .filter(|e| &e.tenant == tenant && &e.actor == actor)
            .count();
        Ok(n as u64)
    }
}
