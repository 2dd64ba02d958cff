use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActorId, TenantId};

/// Side-effect records handed to the notifier. Each carries the tenant's
/// notification target as read when the record was produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Announcement {
    Bump {
        tenant: TenantId,
        actor: ActorId,
        next_deadline: DateTime<Utc>,
        target: Option<String>,
    },
    Reminder {
        tenant: TenantId,
        last_actor: ActorId,
        escalation_target: Option<String>,
        target: Option<String>,
    },
    Reset {
        tenant: TenantId,
        by: Option<ActorId>,
        target: Option<String>,
    },
}

impl Announcement {
    pub fn tenant(&self) -> &TenantId {
        match self {
            Announcement::Bump { tenant, .. }
            | Announcement::Reminder { tenant, .. }
            | Announcement::Reset { tenant, .. } => tenant,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Announcement::Bump { target, .. }
            | Announcement::Reminder { target, .. }
            | Announcement::Reset { target, .. } => target.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Announcement::Bump { .. } => "bump",
            Announcement::Reminder { .. } => "reminder",
            Announcement::Reset { .. } => "reset",
        }
    }

    /// Chat-ready text using platform mention syntax.
    pub fn render(&self) -> String {
        match self {
            Announcement::Bump {
                actor,
                next_deadline,
                ..
            } => format!(
                "📌 <@{}> bumped the server!\nNext bump at **{}**",
                actor,
                next_deadline.format("%H:%M UTC")
            ),
            Announcement::Reminder {
                last_actor,
                escalation_target,
                ..
            } => match escalation_target {
                Some(role) => format!("🔔 <@{last_actor}> it's time to bump again! <@&{role}>"),
                None => format!("🔔 <@{last_actor}> it's time to bump again!"),
            },
            Announcement::Reset { by, .. } => match by {
                Some(actor) => format!("🔄 Bump timer has been reset by <@{actor}>"),
                None => "🔄 Bump timer has been reset".to_string(),
            },
        }
    }
}
