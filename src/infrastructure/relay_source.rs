use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::application::{AppError, AppResult, BumpSource, ObservedBump};
use crate::domain::{ActorId, TenantId};

pub const DEFAULT_BUMP_BOT_ID: &str = "302050872383242240";
pub const DEFAULT_BUMP_KEYWORD: &str = "bump done";

/// A chat message as forwarded by the gateway relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub id: String,
    pub author_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub embeds: Vec<RelayEmbed>,
    /// Author of the message this one replies to.
    #[serde(default)]
    pub referenced_author_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEmbed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Recognises the bump bot's confirmation: an embed containing the keyword,
/// posted in reply to the user who bumped.
#[derive(Debug, Clone)]
pub struct BumpDetector {
    bot_author_id: String,
    keyword: String,
}

impl BumpDetector {
    pub fn new(bot_author_id: impl Into<String>, keyword: &str) -> Self {
        Self {
            bot_author_id: bot_author_id.into(),
            keyword: keyword.to_lowercase(),
        }
    }

    pub fn detect(&self, msg: &RelayMessage) -> Option<ObservedBump> {
        if msg.author_id != self.bot_author_id {
            return None;
        }
        let description = msg.embeds.first()?.description.as_deref()?;
        if !description.to_lowercase().contains(&self.keyword) {
            return None;
        }
        let bumper = msg.referenced_author_id.as_deref()?;
        match ActorId::parse(bumper) {
            Ok(actor) => Some(ObservedBump {
                actor,
                observed_at: msg.timestamp,
            }),
            Err(e) => {
                tracing::warn!(message = %msg.id, error = %e, "bump confirmation with unusable bumper id");
                None
            }
        }
    }
}

impl Default for BumpDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BUMP_BOT_ID, DEFAULT_BUMP_KEYWORD)
    }
}

/// Polls recent channel history through the gateway relay's REST surface.
pub struct RelayBumpSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    detector: BumpDetector,
    history_limit: u32,
}

impl RelayBumpSource {
    pub fn new(
        base_url: String,
        token: Option<String>,
        detector: BumpDetector,
        history_limit: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            detector,
            history_limit,
        }
    }
}

#[async_trait]
impl BumpSource for RelayBumpSource {
    async fn recent_bumps(&self, tenant: &TenantId, source: &str) -> AppResult<Vec<ObservedBump>> {
        let url = format!("{}/channels/{}/messages", self.base_url, source);

        let mut req = self
            .client
            .get(url)
            .query(&[("limit", self.history_limit)])
            .header(USER_AGENT, "bumpwatch")
            .header(ACCEPT, "application/json");

        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Source(e.to_string()))?;

        // channel gone or not visible: nothing to scan
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(tenant = %tenant, source, "watched channel not found");
            return Ok(vec![]);
        }

        let resp = resp
            .error_for_status()
            .map_err(|e| AppError::Source(e.to_string()))?;

        let mut messages: Vec<RelayMessage> = resp
            .json()
            .await
            .map_err(|e| AppError::Source(e.to_string()))?;

        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(messages.iter().filter_map(|m| self.detector.detect(m)).collect())
    }
}
