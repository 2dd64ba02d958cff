use std::time::Duration;

use serde::Deserialize;

use crate::application::{AppError, AppResult};
use crate::domain::{CooldownSettings, ReminderPolicy};
use crate::infrastructure::relay_source::{DEFAULT_BUMP_BOT_ID, DEFAULT_BUMP_KEYWORD};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_dedup_tolerance_seconds")]
    pub dedup_tolerance_seconds: u64,
    #[serde(default)]
    pub reminder_policy: ReminderPolicy,
    #[serde(default = "default_scan_tick_seconds")]
    pub scan_tick_seconds: u64,
    #[serde(default)]
    pub http: HttpCfg,
    /// Gateway relay used by the polling detector; no relay, no scanning.
    pub relay: Option<RelayCfg>,
}

#[derive(Debug, Deserialize)]
pub struct HttpCfg {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelayCfg {
    pub base_url: String,
    #[serde(default = "default_bot_author_id")]
    pub bot_author_id: String,
    #[serde(default = "default_keyword")]
    pub keyword: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

fn default_cooldown_seconds() -> u64 {
    7200
}

fn default_dedup_tolerance_seconds() -> u64 {
    5
}

fn default_scan_tick_seconds() -> u64 {
    10
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_bot_author_id() -> String {
    DEFAULT_BUMP_BOT_ID.to_string()
}

fn default_keyword() -> String {
    DEFAULT_BUMP_KEYWORD.to_string()
}

fn default_history_limit() -> u32 {
    5
}

impl Config {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let raw = expand_env(raw);
        let cfg: Config = serde_yaml::from_str(&raw)?;
        if cfg.scan_tick_seconds == 0 {
            anyhow::bail!("scan_tick_seconds must be positive");
        }
        Ok(cfg)
    }

    pub fn cooldown_settings(&self) -> AppResult<CooldownSettings> {
        CooldownSettings::new(
            Duration::from_secs(self.cooldown_seconds),
            Duration::from_secs(self.dedup_tolerance_seconds),
        )
        .map_err(|e| AppError::Config(e.to_string()))
    }
}

/// very small ${VAR} expansion to keep config simple
fn expand_env(s: &str) -> String {
    let mut out = s.to_string();
    for (k, v) in std::env::vars() {
        out = out.replace(&format!("${{{}}}", k), &v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_takes_defaults() {
        let cfg = Config::from_yaml("{}").unwrap();
        assert_eq!(cfg.cooldown_seconds, 7200);
        assert_eq!(cfg.dedup_tolerance_seconds, 5);
        assert_eq!(cfg.reminder_policy, ReminderPolicy::Once);
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
        assert!(cfg.relay.is_none());
        assert!(cfg.cooldown_settings().is_ok());
    }

    #[test]
    fn parses_full_file() {
        let raw = r#"
cooldown_seconds: 3600
dedup_tolerance_seconds: 2
reminder_policy: repeat
scan_tick_seconds: 5
http:
  bind: 127.0.0.1:9000
relay:
  base_url: http://relay.local
  history_limit: 10
"#;
        let cfg = Config::from_yaml(raw).unwrap();
        assert_eq!(cfg.reminder_policy, ReminderPolicy::Repeat);
        assert_eq!(cfg.http.bind, "127.0.0.1:9000");
        let relay = cfg.relay.unwrap();
        assert_eq!(relay.base_url, "http://relay.local");
        assert_eq!(relay.bot_author_id, DEFAULT_BUMP_BOT_ID);
        assert_eq!(relay.keyword, DEFAULT_BUMP_KEYWORD);
        assert_eq!(relay.history_limit, 10);
    }

    #[test]
    fn rejects_zero_cooldown() {
        let cfg = Config::from_yaml("cooldown_seconds: 0").unwrap();
        assert!(matches!(cfg.cooldown_settings(), Err(AppError::Config(_))));
    }
}
