use std::sync::Arc;

use crate::application::usecases::{CooldownEngine, ResetOutcome};
use crate::application::{AppError, AppResult, TenantStore};
use crate::domain::{
    ActorId, ConfigPatch, MIN_DETECTION_INTERVAL_SECS, TenantConfig, TenantId,
};

/// Privileged commands. Callers are expected to have checked permissions.
pub struct AdminService {
    store: Arc<dyn TenantStore>,
    engine: Arc<CooldownEngine>,
}

impl AdminService {
    pub fn new(store: Arc<dyn TenantStore>, engine: Arc<CooldownEngine>) -> Self {
        Self { store, engine }
    }

    pub async fn set_notification_target(
        &self,
        tenant: &TenantId,
        channel: &str,
    ) -> AppResult<TenantConfig> {
        self.update(
            tenant,
            ConfigPatch {
                notification_target: Some(non_blank("notification target", channel)?),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_escalation_target(
        &self,
        tenant: &TenantId,
        role: &str,
    ) -> AppResult<TenantConfig> {
        self.update(
            tenant,
            ConfigPatch {
                escalation_target: Some(non_blank("escalation target", role)?),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_detection_source(
        &self,
        tenant: &TenantId,
        channel: &str,
    ) -> AppResult<TenantConfig> {
        self.update(
            tenant,
            ConfigPatch {
                detection_source: Some(non_blank("detection source", channel)?),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_detection_interval(
        &self,
        tenant: &TenantId,
        seconds: u64,
    ) -> AppResult<TenantConfig> {
        self.update(
            tenant,
            ConfigPatch {
                detection_interval_secs: Some(seconds),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_detection_enabled(
        &self,
        tenant: &TenantId,
        enabled: bool,
    ) -> AppResult<TenantConfig> {
        self.update(
            tenant,
            ConfigPatch {
                detection_enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    /// Flip detection on/off; returns the new config.
    pub async fn toggle_detection(&self, tenant: &TenantId) -> AppResult<TenantConfig> {
        let enabled = match self.store.get_config(tenant).await? {
            Some(config) => !config.detection.enabled,
            None => !TenantConfig::new(tenant.clone()).detection.enabled,
        };
        self.set_detection_enabled(tenant, enabled).await
    }

    /// Apply several settings at once, validated like the single setters.
    pub async fn update(&self, tenant: &TenantId, mut patch: ConfigPatch) -> AppResult<TenantConfig> {
        if patch.is_empty() {
            return Err(AppError::InvalidCommand("nothing to update".into()));
        }
        if let Some(secs) = patch.detection_interval_secs {
            if secs < MIN_DETECTION_INTERVAL_SECS {
                return Err(AppError::InvalidCommand(format!(
                    "detection interval must be at least {MIN_DETECTION_INTERVAL_SECS}s, got {secs}s"
                )));
            }
        }
        for (what, value) in [
            ("notification target", &mut patch.notification_target),
            ("escalation target", &mut patch.escalation_target),
            ("detection source", &mut patch.detection_source),
        ] {
            if let Some(v) = value.as_deref() {
                *value = Some(non_blank(what, v)?);
            }
        }
        let config = self.store.put_config(tenant, &patch).await?;
        tracing::info!(tenant = %tenant, ?patch, "tenant config updated");
        Ok(config)
    }

    pub async fn reset(&self, tenant: &TenantId, by: Option<ActorId>) -> AppResult<ResetOutcome> {
        self.engine.reset(tenant, by).await
    }
}

fn non_blank(what: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidCommand(format!("{what} must not be empty")));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::usecases::ReminderDispatcher;
    use crate::application::usecases::testing::{RecordingNotifier, t0};
    use crate::domain::{CooldownSettings, DEFAULT_DETECTION_INTERVAL_SECS, ReminderPolicy};
    use crate::infrastructure::clock::MonotonicClock;
    use crate::infrastructure::memory_store::InMemoryTenantStore;

    fn admin(store: &InMemoryTenantStore) -> AdminService {
        let notifier = RecordingNotifier::new();
        let settings =
            CooldownSettings::new(Duration::from_secs(7200), Duration::from_secs(5)).unwrap();
        let dispatcher = ReminderDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
            Arc::new(MonotonicClock::starting_at(t0())),
            settings,
            ReminderPolicy::Once,
        );
        let engine = CooldownEngine::new(
            Arc::new(store.clone()),
            Arc::new(notifier),
            dispatcher,
            settings,
        );
        AdminService::new(Arc::new(store.clone()), Arc::new(engine))
    }

    #[tokio::test]
    async fn first_command_creates_config_with_defaults() {
        let store = InMemoryTenantStore::new();
        let a = admin(&store);
        let g = TenantId::parse("g1").unwrap();

        let cfg = a.set_notification_target(&g, " 555 ").await.unwrap();
        assert_eq!(cfg.notification_target.as_deref(), Some("555"));
        assert_eq!(cfg.detection.interval_secs, DEFAULT_DETECTION_INTERVAL_SECS);
        assert!(cfg.detection.enabled);

        let cfg = a.set_escalation_target(&g, "777").await.unwrap();
        assert_eq!(cfg.notification_target.as_deref(), Some("555"));
        assert_eq!(cfg.escalation_target.as_deref(), Some("777"));
    }

    #[tokio::test]
    async fn rejects_invalid_input() {
        let store = InMemoryTenantStore::new();
        let a = admin(&store);
        let g = TenantId::parse("g1").unwrap();

        assert!(matches!(
            a.set_detection_interval(&g, 1).await,
            Err(AppError::InvalidCommand(_))
        ));
        assert!(matches!(
            a.set_detection_source(&g, "   ").await,
            Err(AppError::InvalidCommand(_))
        ));
        assert!(store.get_config(&g).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn toggle_flips_detection() {
        let store = InMemoryTenantStore::new();
        let a = admin(&store);
        let g = TenantId::parse("g1").unwrap();

        assert!(!a.toggle_detection(&g).await.unwrap().detection.enabled);
        assert!(a.toggle_detection(&g).await.unwrap().detection.enabled);
    }

    #[tokio::test]
    async fn update_applies_the_setter_checks() {
        let store = InMemoryTenantStore::new();
        let a = admin(&store);
        let g = TenantId::parse("g1").unwrap();

        for blank in [
            ConfigPatch {
                notification_target: Some(String::new()),
                ..Default::default()
            },
            ConfigPatch {
                escalation_target: Some("  ".into()),
                detection_enabled: Some(false),
                ..Default::default()
            },
            ConfigPatch {
                detection_source: Some("\t".into()),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                a.update(&g, blank).await,
                Err(AppError::InvalidCommand(_))
            ));
        }
        assert!(store.get_config(&g).await.unwrap().is_none());

        let cfg = a
            .update(
                &g,
                ConfigPatch {
                    notification_target: Some(" 555 ".into()),
                    detection_interval_secs: Some(60),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cfg.notification_target.as_deref(), Some("555"));
        assert_eq!(cfg.detection.interval_secs, 60);
    }
}
