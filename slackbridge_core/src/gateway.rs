//! Upstream gateway for the Slack Web API.
//!
//! Every network call goes through [`SlackGateway::call`], which owns the
//! retry loop. Each failed attempt is classified exactly once into an
//! [`UpstreamFailure`]; everything downstream matches on that variant (or on
//! the [`ConnectorError`] it becomes) rather than on raw status codes.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::SlackConfig;
use crate::error::ConnectorError;
use crate::stats::RequestStats;

pub const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack caps `search.messages` at 100 results per page.
pub const SLACK_MAX_SEARCH_COUNT: u32 = 100;
/// Slack caps `conversations.replies` at 1000 messages per page.
pub const SLACK_MAX_REPLIES_LIMIT: u32 = 1_000;

const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "token_revoked",
    "token_expired",
    "account_inactive",
    "missing_scope",
    "not_allowed_token_type",
];

const RATE_LIMIT_CODES: &[&str] = &["ratelimited", "rate_limited"];

/// Longer `Retry-After` hints are ignored in favour of the backoff schedule.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Backoff settings for one upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the retry that follows the 0-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSort {
    Score,
}

impl SearchSort {
    fn as_str(&self) -> &'static str {
        match self {
            SearchSort::Score => "score",
        }
    }
}

/// Raw `search.messages` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchEnvelope {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub messages: Option<SearchMessages>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchMessages {
    /// Left untyped so a non-array value can be detected and rejected.
    #[serde(default)]
    pub matches: Option<Value>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub paging: Option<Paging>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub pages: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub page_count: Option<u64>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

impl SearchMessages {
    pub fn reported_total(&self) -> u64 {
        self.total
            .or_else(|| self.paging.as_ref().and_then(|p| p.total))
            .or_else(|| self.pagination.as_ref().and_then(|p| p.total_count))
            .unwrap_or(0)
    }

    pub fn has_more_pages(&self) -> bool {
        if let Some(p) = &self.paging {
            if let (Some(page), Some(pages)) = (p.page, p.pages) {
                return page < pages;
            }
        }
        if let Some(p) = &self.pagination {
            if let (Some(page), Some(count)) = (p.page, p.page_count) {
                return page < count;
            }
        }
        false
    }
}

/// Raw `conversations.replies` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadEnvelope {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub messages: Option<Value>,
    #[serde(default)]
    pub has_more: Option<bool>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ThreadEnvelope {
    pub fn next_cursor(&self) -> Option<String> {
        self.response_metadata
            .as_ref()
            .and_then(|m| m.next_cursor.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// The upstream operations the resolvers depend on.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn search(
        &self,
        query: &str,
        count: Option<u32>,
        sort: Option<SearchSort>,
        team_id: Option<&str>,
    ) -> Result<SearchEnvelope, ConnectorError>;

    async fn thread_page(
        &self,
        channel_id: &str,
        root_ts: &str,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<ThreadEnvelope, ConnectorError>;

    async fn channel_name(&self, channel_id: &str) -> Result<String, ConnectorError>;
}

/// Classification of one failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFailure {
    RateLimited { retry_after: Option<Duration> },
    Unauthorized { code: String },
    Unreachable { message: String },
    Rejected { code: String },
    Malformed { message: String },
}

impl UpstreamFailure {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamFailure::RateLimited { .. } | UpstreamFailure::Unreachable { .. }
        )
    }
}

/// Classify an HTTP response. Checks run in priority order: rate limit,
/// authentication, connectivity (5xx), then business errors.
pub fn classify_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> Result<Value, UpstreamFailure> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error_code = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.as_str())
        .map(str::to_string);

    if status == StatusCode::TOO_MANY_REQUESTS
        || error_code
            .as_deref()
            .is_some_and(|c| RATE_LIMIT_CODES.contains(&c))
    {
        return Err(UpstreamFailure::RateLimited { retry_after });
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(UpstreamFailure::Unauthorized {
            code: error_code.unwrap_or_else(|| format!("http_{}", status.as_u16())),
        });
    }
    if let Some(code) = error_code
        .as_deref()
        .filter(|c| AUTH_ERROR_CODES.contains(c))
    {
        return Err(UpstreamFailure::Unauthorized {
            code: code.to_string(),
        });
    }

    if status.is_server_error() {
        return Err(UpstreamFailure::Unreachable {
            message: format!("server error {}", status.as_u16()),
        });
    }

    let Some(value) = parsed else {
        if status.is_success() {
            return Err(UpstreamFailure::Malformed {
                message: "response body is not JSON".to_string(),
            });
        }
        return Err(UpstreamFailure::Rejected {
            code: format!("http_{}", status.as_u16()),
        });
    };

    if value.get("ok").and_then(|ok| ok.as_bool()) == Some(true) {
        Ok(value)
    } else {
        Err(UpstreamFailure::Rejected {
            code: error_code.unwrap_or_else(|| "unknown_error".to_string()),
        })
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())?
        .trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
}

#[derive(Clone)]
pub struct SlackGateway {
    client: reqwest::Client,
    token: String,
    api_base: String,
    retry: RetryPolicy,
    stats: Arc<RequestStats>,
}

impl fmt::Debug for SlackGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackGateway")
            .field("api_base", &self.api_base)
            .field("retry", &self.retry)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl SlackGateway {
    pub fn new(
        token: impl Into<String>,
        timeout: Duration,
        stats: Arc<RequestStats>,
    ) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("slackbridge/", env!("CARGO_PKG_VERSION"), " slack-gateway"))
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::InternalError(e.to_string()))?;
        Ok(Self {
            client,
            token: token.into(),
            api_base: SLACK_API_BASE.to_string(),
            retry: RetryPolicy::default(),
            stats,
        })
    }

    pub fn from_config(
        config: &SlackConfig,
        stats: Arc<RequestStats>,
    ) -> Result<Self, ConnectorError> {
        Ok(Self::new(config.token(), config.request_timeout, stats)?
            .with_api_base(config.api_base.clone()))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Perform one Web API call with classification and bounded retries.
    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, ConnectorError> {
        let url = format!("{}/{}", self.api_base, method);
        with_retry(&self.retry, &self.stats, method, || self.attempt(&url, params)).await
    }

    async fn attempt(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Value, UpstreamFailure> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(|e| UpstreamFailure::Unreachable {
                message: transport_message(e),
            })?;

        let status = resp.status();
        let retry_after = parse_retry_after(resp.headers());
        let body = resp.text().await.map_err(|e| UpstreamFailure::Unreachable {
            message: transport_message(e),
        })?;
        classify_response(status, retry_after, &body)
    }
}

/// Drive `attempt` until it succeeds, hits a fatal failure, or the policy's
/// attempts run out.
///
/// Retry waits follow `RetryPolicy::delay_for`, except that a rate-limit
/// `Retry-After` of at most [`MAX_RETRY_AFTER`] replaces the computed delay.
pub(crate) async fn with_retry<F, Fut>(
    retry: &RetryPolicy,
    stats: &RequestStats,
    method: &str,
    mut attempt: F,
) -> Result<Value, ConnectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, UpstreamFailure>>,
{
    let max_attempts = retry.max_attempts();
    let mut tried: u32 = 0;

    loop {
        let failure = match attempt().await {
            Ok(value) => {
                if tried > 0 {
                    debug!(method, attempts = tried + 1, "Slack call succeeded after retry");
                }
                return Ok(value);
            }
            Err(failure) => failure,
        };

        let attempts = tried + 1;
        let exhausted = attempts >= max_attempts;

        match &failure {
            UpstreamFailure::RateLimited { retry_after } => {
                warn!(
                    event = "rate_limit_error",
                    method,
                    attempt = attempts,
                    retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                    "Slack rate limited the request"
                );
                if exhausted {
                    stats.record_rate_limit_event();
                    return Err(ConnectorError::RateLimit { attempts });
                }
            }
            UpstreamFailure::Unauthorized { code } => {
                error!(
                    event = "authentication_error",
                    method,
                    error_code = %code,
                    "Slack rejected the credential"
                );
                return Err(ConnectorError::Authentication { code: code.clone() });
            }
            UpstreamFailure::Unreachable { message } => {
                warn!(
                    event = "connectivity_error",
                    method,
                    attempt = attempts,
                    error = %message,
                    "Slack request failed in transit"
                );
                if exhausted {
                    return Err(ConnectorError::Connectivity {
                        attempts,
                        message: message.clone(),
                    });
                }
            }
            UpstreamFailure::Rejected { code } => {
                warn!(event = "api_error", method, error_code = %code, "Slack API error");
                return Err(ConnectorError::UpstreamBusiness { code: code.clone() });
            }
            UpstreamFailure::Malformed { message } => {
                error!(event = "api_error", method, error = %message, "Malformed Slack response");
                return Err(ConnectorError::InvalidResponse(format!(
                    "{}: {}",
                    method, message
                )));
            }
        }

        debug_assert!(failure.is_retryable());
        let delay = match failure {
            UpstreamFailure::RateLimited {
                retry_after: Some(wait),
            } if wait <= MAX_RETRY_AFTER => wait,
            _ => retry.delay_for(tried),
        };
        debug!(method, attempt = attempts, delay_ms = delay.as_millis() as u64, "Retrying Slack call");
        sleep(delay).await;
        tried += 1;
    }
}

fn transport_message(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else {
        // Drop the URL so query parameters never reach the logs.
        e.without_url().to_string()
    }
}

#[async_trait]
impl SlackApi for SlackGateway {
    async fn search(
        &self,
        query: &str,
        count: Option<u32>,
        sort: Option<SearchSort>,
        team_id: Option<&str>,
    ) -> Result<SearchEnvelope, ConnectorError> {
        let mut params: Vec<(&str, String)> = vec![("query", query.to_string())];
        if let Some(c) = count {
            params.push(("count", c.clamp(1, SLACK_MAX_SEARCH_COUNT).to_string()));
        }
        if let Some(s) = sort {
            params.push(("sort", s.as_str().to_string()));
            params.push(("sort_dir", "desc".to_string()));
        }
        if let Some(team) = team_id {
            params.push(("team_id", team.to_string()));
        }
        let v = self.call("search.messages", &params).await?;
        serde_json::from_value(v)
            .map_err(|e| ConnectorError::InvalidResponse(format!("search.messages: {}", e)))
    }

    async fn thread_page(
        &self,
        channel_id: &str,
        root_ts: &str,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<ThreadEnvelope, ConnectorError> {
        let mut params: Vec<(&str, String)> = vec![
            ("channel", channel_id.to_string()),
            ("ts", root_ts.to_string()),
        ];
        if let Some(l) = limit {
            params.push(("limit", l.clamp(1, SLACK_MAX_REPLIES_LIMIT).to_string()));
        }
        if let Some(c) = cursor {
            params.push(("cursor", c.to_string()));
        }
        let v = self.call("conversations.replies", &params).await?;
        serde_json::from_value(v)
            .map_err(|e| ConnectorError::InvalidResponse(format!("conversations.replies: {}", e)))
    }

    async fn channel_name(&self, channel_id: &str) -> Result<String, ConnectorError> {
        let v = self
            .call("conversations.info", &[("channel", channel_id.to_string())])
            .await?;
        v.get("channel")
            .and_then(|c| c.get("name"))
            .and_then(|n| n.as_str())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ConnectorError::InvalidResponse(format!(
                    "conversations.info returned no name for {}",
                    channel_id
                ))
            })
    }
}
