use async_trait::async_trait;

use crate::application::{AppResult, Notifier};
use crate::domain::Announcement;

pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, announcement: &Announcement) -> AppResult<()> {
        println!(
            "NOTIFY: kind={} tenant={} target={} text={:?}",
            announcement.kind(),
            announcement.tenant(),
            announcement.target().unwrap_or("(none)"),
            announcement.render()
        );
        Ok(())
    }
}
