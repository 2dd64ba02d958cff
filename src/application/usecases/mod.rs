pub mod admin_commands;
pub mod cooldown_engine;
pub mod query_service;
pub mod reminder_dispatcher;
pub mod scan_once;

pub use admin_commands::AdminService;
pub use cooldown_engine::{AcceptedBump, CooldownEngine, DedupReason, IngestOutcome, ResetOutcome};
pub use query_service::{DEFAULT_HISTORY_LIMIT, QueryService, TenantStatus};
pub use reminder_dispatcher::{ArmedReminder, FireOutcome, ReminderDispatcher};
pub use scan_once::{ScanOnceUseCase, ScanReport};

use crate::application::Notifier;
use crate::domain::Announcement;

/// Hand an announcement to the notifier. Delivery failures stay here: they
/// are logged and never unwind into the cooldown logic.
pub(crate) async fn deliver(notifier: &dyn Notifier, announcement: &Announcement) {
    if let Err(e) = notifier.notify(announcement).await {
        tracing::warn!(
            tenant = %announcement.tenant(),
            kind = announcement.kind(),
            error = %e,
            "announcement not delivered"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::application::{AppError, AppResult, Notifier};
    use crate::domain::Announcement;

    pub fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_767_225_600, 0).unwrap()
    }

    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        seen: Arc<Mutex<Vec<Announcement>>>,
        failing: bool,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Records, then reports a delivery failure.
        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }

        pub fn announcements(&self) -> Vec<Announcement> {
            self.seen.lock().unwrap().clone()
        }

        pub fn reminders(&self) -> Vec<Announcement> {
            self.announcements()
                .into_iter()
                .filter(|a| matches!(a, Announcement::Reminder { .. }))
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, announcement: &Announcement) -> AppResult<()> {
            self.seen.lock().unwrap().push(announcement.clone());
            if self.failing {
                return Err(AppError::Notifier("channel missing".into()));
            }
            Ok(())
        }
    }
}
