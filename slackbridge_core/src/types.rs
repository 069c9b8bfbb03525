//! Request and response types for search and thread retrieval.

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// A message search request, including the scope injected from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// Restrict the search to these channel ids. Empty means unscoped.
    pub channel_ids: Vec<String>,
    pub max_result_count: Option<u32>,
    pub team_id: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_channels<I, S>(mut self, channel_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_ids = channel_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_results(mut self, max: u32) -> Self {
        self.max_result_count = Some(max);
        self
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReplyOrder {
    #[default]
    Oldest,
    Newest,
}

/// A single-page thread fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadRequest {
    pub channel_id: String,
    pub thread_ts: String,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub order: ReplyOrder,
}

impl ThreadRequest {
    pub fn new(channel_id: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_ts: thread_ts.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_order(mut self, order: ReplyOrder) -> Self {
        self.order = order;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub text: String,
    /// ISO-8601, or empty when the native timestamp could not be converted.
    pub timestamp: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    pub text: String,
    /// ISO-8601, or empty when the native timestamp could not be converted.
    pub timestamp: String,
    /// Slack's native `ts`, kept verbatim for parent matching.
    pub ts: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Set whenever Slack attaches an `edited` marker, even one without a `ts`.
    pub is_edited: bool,
    /// Absent when the edit marker carries no convertible `ts`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_timestamp: Option<String>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub messages: Vec<NormalizedMessage>,
    #[serde(rename = "total")]
    pub total_result_count: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ThreadMessage>,
    pub replies: Vec<ThreadMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Trim `value` and reject it when nothing is left.
pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<String, ConnectorError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConnectorError::Validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(trimmed.to_string())
}

/// Parse a Slack `ts` ("1716932719.000123") into fractional seconds.
pub fn parse_slack_ts(ts: &str) -> Option<f64> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    ts.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Convert a Slack `ts` to ISO-8601 with millisecond precision.
///
/// Returns an empty string when the value cannot be converted.
pub fn slack_ts_to_iso(ts: &str) -> String {
    let Some(seconds) = parse_slack_ts(ts) else {
        return String::new();
    };
    let millis = (seconds * 1000.0).round();
    if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
        return String::new();
    }
    DateTime::from_timestamp_millis(millis as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}
