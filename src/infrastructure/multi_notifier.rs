use async_trait::async_trait;

use crate::application::{AppResult, Notifier};
use crate::domain::Announcement;

pub struct MultiNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(&self, announcement: &Announcement) -> AppResult<()> {
        // one failing channel must not starve the others
        let mut last_err = None;

        for n in &self.notifiers {
            if let Err(e) = n.notify(announcement).await {
                last_err = Some(e);
            }
        }

        if let Some(e) = last_err {
            return Err(e);
        }

        Ok(())
    }
}
