use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ActorId, Announcement, BumpHistoryEntry, ConfigPatch, CooldownState, StateSlot, TenantConfig,
    TenantId,
};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("event source error: {0}")]
    Source(String),
    #[error("notifier error: {0}")]
    Notifier(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

pub type AppResult<T> = Result<T, AppError>;

/// A bump as seen by a detector, before the tenant and pass are attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedBump {
    pub actor: ActorId,
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct HistoryQuery {
    pub tenant: TenantId,
    pub limit: u32,
    pub actor: Option<ActorId>,
}

/// Durable per-tenant config, cooldown slot and bump log.
///
/// State writes are compare-and-set on the slot generation so that an
/// `ingest` and a maturing timer for the same tenant can never both win.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get_config(&self, tenant: &TenantId) -> AppResult<Option<TenantConfig>>;
    /// Upsert: creates the config with defaults first if missing.
    async fn put_config(&self, tenant: &TenantId, patch: &ConfigPatch) -> AppResult<TenantConfig>;
    async fn list_configs(&self) -> AppResult<Vec<TenantConfig>>;

    /// Unknown tenants read as generation 0 with no state.
    async fn get_state(&self, tenant: &TenantId) -> AppResult<StateSlot>;

    /// Replace the state if the slot still has `expected_generation`.
    /// `None` clears the state but keeps the generation.
    async fn compare_and_swap_state(
        &self,
        tenant: &TenantId,
        expected_generation: u64,
        new_state: Option<&CooldownState>,
    ) -> AppResult<bool>;

    /// Compare-and-set the new state and append its history entry as one unit.
    async fn record_bump(
        &self,
        expected_generation: u64,
        state: &CooldownState,
        entry: &BumpHistoryEntry,
    ) -> AppResult<bool>;

    async fn list_active_states(&self) -> AppResult<Vec<CooldownState>>;

    /// Most recent first.
    async fn query_history(&self, query: HistoryQuery) -> AppResult<Vec<BumpHistoryEntry>>;
    async fn count_history(&self, tenant: &TenantId, actor: &ActorId) -> AppResult<u64>;
}

/// Deliver announcements to the tenant's channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, announcement: &Announcement) -> AppResult<()>;
}

/// Read recent bumps from a watched channel, newest first.
#[async_trait]
pub trait BumpSource: Send + Sync {
    async fn recent_bumps(&self, tenant: &TenantId, source: &str) -> AppResult<Vec<ObservedBump>>;
}

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}
