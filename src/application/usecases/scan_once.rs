use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};

use crate::application::usecases::{CooldownEngine, IngestOutcome};
use crate::application::{AppResult, BumpSource, Clock, TenantStore};
use crate::domain::{BumpObservation, PassId, TenantConfig, TenantId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub accepted: usize,
    pub failed: usize,
}

/// One tick of the polling detector: re-read recent channel history for
/// every tenant whose detection interval elapsed and feed it to the engine.
///
/// History re-reads repeat the same messages on every poll; the engine is
/// what drops them.
pub struct ScanOnceUseCase<'a> {
    pub store: &'a dyn TenantStore,
    pub source: &'a dyn BumpSource,
    pub engine: &'a CooldownEngine,
    pub clock: &'a dyn Clock,
    last_scan: Mutex<HashMap<TenantId, DateTime<Utc>>>,
    next_pass: AtomicU64,
}

impl<'a> ScanOnceUseCase<'a> {
    pub fn new(
        store: &'a dyn TenantStore,
        source: &'a dyn BumpSource,
        engine: &'a CooldownEngine,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            store,
            source,
            engine,
            clock,
            last_scan: Mutex::new(HashMap::new()),
            next_pass: AtomicU64::new(1),
        }
    }

    pub async fn execute(&self) -> AppResult<ScanReport> {
        let mut report = ScanReport::default();
        let now = self.clock.now();

        for config in self.store.list_configs().await? {
            let Some(source) = config.detection.source.as_deref() else {
                continue;
            };
            if !config.detection.enabled || !self.due(&config, now) {
                continue;
            }
            report.scanned += 1;

            match self.scan_tenant(&config.tenant, source).await {
                Ok(accepted) => report.accepted += accepted,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(tenant = %config.tenant, error = %e, "scan failed");
                }
            }
        }
        Ok(report)
    }

    async fn scan_tenant(&self, tenant: &TenantId, source: &str) -> AppResult<usize> {
        let pass = PassId(self.next_pass.fetch_add(1, Ordering::Relaxed));
        let bumps = self.source.recent_bumps(tenant, source).await?;
        tracing::debug!(tenant = %tenant, %pass, found = bumps.len(), "channel scanned");

        let mut accepted = 0;
        for bump in bumps {
            let outcome = self
                .engine
                .ingest(BumpObservation {
                    tenant: tenant.clone(),
                    actor: bump.actor,
                    observed_at: bump.observed_at,
                    pass: Some(pass),
                })
                .await?;
            if matches!(outcome, IngestOutcome::Accepted(_)) {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    fn due(&self, config: &TenantConfig, now: DateTime<Utc>) -> bool {
        let mut last_scan = self
            .last_scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let interval = i64::try_from(config.detection.interval_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let due = last_scan
            .get(&config.tenant)
            .is_none_or(|last| now - *last >= interval);
        if due {
            last_scan.insert(config.tenant.clone(), now);
        }
        due
    }
}
