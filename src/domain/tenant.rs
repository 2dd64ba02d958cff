use serde::{Deserialize, Serialize};

use super::TenantId;

pub const DEFAULT_DETECTION_INTERVAL_SECS: u64 = 30;
pub const MIN_DETECTION_INTERVAL_SECS: u64 = 5;

/// Per-tenant settings, mutated by admin commands and never deleted automatically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant: TenantId,
    /// Channel that receives bump, reset and reminder announcements.
    pub notification_target: Option<String>,
    /// Role mentioned when the reminder fires.
    pub escalation_target: Option<String>,
    pub detection: DetectionSettings,
}

/// How the polling detector watches this tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSettings {
    pub source: Option<String>,
    pub interval_secs: u64,
    pub enabled: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            source: None,
            interval_secs: DEFAULT_DETECTION_INTERVAL_SECS,
            enabled: true,
        }
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub notification_target: Option<String>,
    #[serde(default)]
    pub escalation_target: Option<String>,
    #[serde(default)]
    pub detection_source: Option<String>,
    #[serde(default)]
    pub detection_interval_secs: Option<u64>,
    #[serde(default)]
    pub detection_enabled: Option<bool>,
}

impl TenantConfig {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            notification_target: None,
            escalation_target: None,
            detection: DetectionSettings::default(),
        }
    }

    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(v) = &patch.notification_target {
            self.notification_target = Some(v.clone());
        }
        if let Some(v) = &patch.escalation_target {
            self.escalation_target = Some(v.clone());
        }
        if let Some(v) = &patch.detection_source {
            self.detection.source = Some(v.clone());
        }
        if let Some(v) = patch.detection_interval_secs {
            self.detection.interval_secs = v;
        }
        if let Some(v) = patch.detection_enabled {
            self.detection.enabled = v;
        }
    }
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self == &ConfigPatch::default()
    }
}
