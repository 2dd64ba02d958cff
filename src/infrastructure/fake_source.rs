use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::application::{AppError, AppResult, BumpSource, ObservedBump};
use crate::domain::TenantId;

/// Scripted channel history for tests and local runs: every scan returns
/// the same bumps until replaced, like a real re-read of recent messages.
#[derive(Clone, Default)]
pub struct FakeBumpSource {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    bumps: HashMap<TenantId, Vec<ObservedBump>>,
    failing: HashSet<TenantId>,
}

impl FakeBumpSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tenant's history; newest first.
    pub fn set(&self, tenant: &TenantId, bumps: Vec<ObservedBump>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.bumps.insert(tenant.clone(), bumps);
        }
    }

    pub fn fail_for(&self, tenant: &TenantId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.insert(tenant.clone());
        }
    }
}

#[async_trait]
impl BumpSource for FakeBumpSource {
    async fn recent_bumps(&self, tenant: &TenantId, source: &str) -> AppResult<Vec<ObservedBump>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| AppError::Source("lock poisoned".into()))?;
        if inner.failing.contains(tenant) {
            return Err(AppError::Source(format!("channel {source} unreachable")));
        }
        Ok(inner.bumps.get(tenant).cloned().unwrap_or_default())
    }
}
