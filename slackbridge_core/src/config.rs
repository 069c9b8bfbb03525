//! Environment configuration.
//!
//! Read once at the composition root; the rest of the crate receives values
//! through constructors.
//!
//! Environment variables:
//! - `SLACK_BOT_TOKEN` (or `SLACK_TOKEN`): bearer token, required
//! - `SLACK_TEAM_ID`: team to scope searches to
//! - `SLACK_CHANNEL_IDS`: comma-separated channel allowlist
//! - `SLACK_API_BASE`: Web API base URL (default: https://slack.com/api)
//! - `SLACK_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 30)

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::gateway::SLACK_API_BASE;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Clone)]
pub struct SlackConfig {
    token: String,
    pub team_id: Option<String>,
    pub channel_ids: Vec<String>,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"<redacted>")
            .field("team_id", &self.team_id)
            .field("channel_ids", &self.channel_ids)
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl SlackConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            team_id: None,
            channel_ids: Vec::new(),
            api_base: SLACK_API_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let token = get("SLACK_BOT_TOKEN")
            .or_else(|| get("SLACK_TOKEN"))
            .ok_or_else(|| ConfigError::MissingEnvVar("SLACK_BOT_TOKEN".to_string()))?;

        let mut config = Self::new(token);
        config.team_id = get("SLACK_TEAM_ID");
        config.channel_ids = get("SLACK_CHANNEL_IDS")
            .map(|raw| parse_channel_list(&raw))
            .unwrap_or_default();

        if let Some(base) = get("SLACK_API_BASE") {
            url::Url::parse(&base).map_err(|e| ConfigError::InvalidValue {
                key: "SLACK_API_BASE".to_string(),
                message: e.to_string(),
            })?;
            config.api_base = base.trim_end_matches('/').to_string();
        }

        if let Some(raw) = get("SLACK_REQUEST_TIMEOUT_SECS") {
            let secs = raw
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "SLACK_REQUEST_TIMEOUT_SECS".to_string(),
                    message: format!("expected a positive integer, got '{}'", raw),
                })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Split a comma-separated channel list, dropping blanks.
pub fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
