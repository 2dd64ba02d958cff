use async_trait::async_trait;
use serde::Serialize;

use crate::application::{AppError, AppResult, Notifier};
use crate::domain::Announcement;

/// Posts announcements to a gateway webhook, which relays them to the
/// tenant's channel. Announcements without a target channel are skipped.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook: String,
}

impl WebhookNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook,
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookMsg<'a> {
    tenant: &'a str,
    channel: &'a str,
    kind: &'a str,
    content: &'a str,
    allowed_mentions: AllowedMentions,
}

#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: [&'static str; 2],
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, announcement: &Announcement) -> AppResult<()> {
        let Some(channel) = announcement.target() else {
            tracing::debug!(
                tenant = %announcement.tenant(),
                kind = announcement.kind(),
                "no notification target set; skipping webhook"
            );
            return Ok(());
        };
        let content = announcement.render();

        let payload = WebhookMsg {
            tenant: announcement.tenant().as_str(),
            channel,
            kind: announcement.kind(),
            content: &content,
            allowed_mentions: AllowedMentions {
                parse: ["users", "roles"],
            },
        };

        self.client
            .post(&self.webhook)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Notifier(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::Notifier(e.to_string()))?;

        Ok(())
    }
}
