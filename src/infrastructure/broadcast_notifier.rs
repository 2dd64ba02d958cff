use async_trait::async_trait;

use crate::application::{AppResult, Notifier};
use crate::domain::Announcement;
use crate::infrastructure::event_bus::EventBus;

/// Mirrors announcements onto the in-process bus for live subscribers.
pub struct BroadcastNotifier {
    bus: EventBus,
}

impl BroadcastNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, announcement: &Announcement) -> AppResult<()> {
        self.bus.publish(announcement.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TenantId;

    #[tokio::test]
    async fn subscribers_receive_announcements() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let notifier = BroadcastNotifier::new(bus);
        let a = Announcement::Reset {
            tenant: TenantId::parse("g1").unwrap(),
            by: None,
            target: None,
        };

        notifier.notify(&a).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), a);
    }
}
