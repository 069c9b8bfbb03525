//! Single-page thread retrieval.
//!
//! Exactly one `conversations.replies` page is fetched per call. Callers
//! continue with the returned cursor; nothing here auto-paginates.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ConnectorError, ErrorKind};
use crate::gateway::SlackApi;
use crate::stats::RequestStats;
use crate::types::{
    parse_slack_ts, require_non_empty, slack_ts_to_iso, ReplyOrder, ThreadMessage, ThreadRequest,
    ThreadResult,
};

pub const DEFAULT_REPLIES_LIMIT: u32 = 200;

const DELETED_SUBTYPES: &[&str] = &["tombstone", "message_deleted"];
const CHANNEL_ACCESS_CODES: &[&str] = &[
    "channel_not_found",
    "not_in_channel",
    "thread_not_found",
    "is_archived",
];

#[derive(Debug, Default, Deserialize)]
struct RawThreadMessage {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    edited: Option<RawEdited>,
    #[serde(default)]
    user_profile: Option<RawProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEdited {
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

pub struct ThreadResolver {
    api: Arc<dyn SlackApi>,
    stats: Arc<RequestStats>,
}

impl ThreadResolver {
    pub fn new(api: Arc<dyn SlackApi>, stats: Arc<RequestStats>) -> Self {
        Self { api, stats }
    }

    pub async fn thread_replies(
        &self,
        request: &ThreadRequest,
    ) -> Result<ThreadResult, ConnectorError> {
        let start = Instant::now();
        let outcome = self.fetch(request).await;
        self.record(request, &outcome, start.elapsed().as_millis() as u64);
        outcome
    }

    async fn fetch(&self, request: &ThreadRequest) -> Result<ThreadResult, ConnectorError> {
        let channel_id = require_non_empty("channelId", &request.channel_id)?;
        let thread_ts = require_non_empty("threadTs", &request.thread_ts)?;
        let cursor = request
            .cursor
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let limit = request.limit.unwrap_or(DEFAULT_REPLIES_LIMIT);

        let envelope = match self
            .api
            .thread_page(&channel_id, &thread_ts, Some(limit), cursor)
            .await
        {
            Ok(envelope) => envelope,
            Err(e) => {
                log_upstream_failure(&channel_id, &thread_ts, &e);
                return Err(e);
            }
        };

        if !envelope.ok {
            return Err(ConnectorError::InvalidResponse(
                "conversations.replies did not report success".to_string(),
            ));
        }
        let next_cursor = envelope.next_cursor();
        let raw = match envelope.messages {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ConnectorError::InvalidResponse(
                    "conversations.replies 'messages' is not an array".to_string(),
                ))
            }
        };

        let mut parent = None;
        let mut replies = Vec::with_capacity(raw.len());
        for item in raw {
            let msg = match serde_json::from_value::<RawThreadMessage>(item) {
                Ok(m) => to_thread_message(m, &channel_id),
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable thread message");
                    continue;
                }
            };
            if parent.is_none() && msg.ts == thread_ts {
                parent = Some(msg);
            } else {
                replies.push(msg);
            }
        }

        sort_replies(&mut replies, request.order);

        Ok(ThreadResult {
            parent,
            replies,
            has_more: next_cursor.is_some(),
            next_cursor,
        })
    }

    fn record(
        &self,
        request: &ThreadRequest,
        outcome: &Result<ThreadResult, ConnectorError>,
        latency_ms: u64,
    ) {
        self.stats.record_latency(latency_ms);
        match outcome {
            Ok(result) => {
                self.stats.record_success();
                info!(
                    event = "thread_success",
                    channel_id = %request.channel_id.trim(),
                    reply_count = result.replies.len(),
                    has_parent = result.parent.is_some(),
                    has_more = result.has_more,
                    latency_ms,
                    "Thread page fetched"
                );
                let cursor_supplied = request
                    .cursor
                    .as_deref()
                    .is_some_and(|c| !c.trim().is_empty());
                if cursor_supplied || result.has_more {
                    self.stats.record_pagination_event();
                    info!(
                        event = "pagination_used",
                        cursor_supplied,
                        has_more = result.has_more,
                        "Thread pagination in use"
                    );
                }
            }
            Err(e) => {
                self.stats.record_failure();
                error!(
                    event = "thread_failure",
                    error_kind = e.kind().as_str(),
                    latency_ms,
                    error = %e,
                    "Thread fetch failed"
                );
            }
        }
    }
}

fn log_upstream_failure(channel_id: &str, thread_ts: &str, e: &ConnectorError) {
    match e.kind() {
        ErrorKind::RateLimit => warn!(
            channel_id,
            thread_ts, "Rate limited while fetching thread replies"
        ),
        ErrorKind::Authentication => error!(
            channel_id,
            thread_ts, "Authentication failed fetching thread; check the token's history scopes"
        ),
        ErrorKind::UpstreamBusiness
            if e.upstream_code()
                .is_some_and(|c| CHANNEL_ACCESS_CODES.contains(&c)) =>
        {
            warn!(
                channel_id,
                thread_ts,
                error_code = e.upstream_code().unwrap_or_default(),
                "Channel or thread is not accessible"
            )
        }
        _ => error!(channel_id, thread_ts, error = %e, "Thread fetch failed upstream"),
    }
}

fn to_thread_message(m: RawThreadMessage, channel_id: &str) -> ThreadMessage {
    let ts = m.ts.unwrap_or_default();
    let is_deleted = m
        .subtype
        .as_deref()
        .is_some_and(|s| DELETED_SUBTYPES.contains(&s));
    let edited_timestamp = m
        .edited
        .as_ref()
        .and_then(|e| e.ts.as_deref())
        .map(slack_ts_to_iso)
        .filter(|iso| !iso.is_empty());
    let profile_name = m.user_profile.and_then(|p| {
        p.display_name
            .filter(|n| !n.trim().is_empty())
            .or(p.real_name.filter(|n| !n.trim().is_empty()))
    });

    ThreadMessage {
        text: m.text.unwrap_or_default(),
        timestamp: slack_ts_to_iso(&ts),
        channel_id: channel_id.to_string(),
        user_id: m.user.filter(|u| !u.is_empty()),
        user_name: profile_name.or(m.username.filter(|u| !u.is_empty())),
        is_edited: m.edited.is_some(),
        edited_timestamp,
        is_deleted,
        ts,
    }
}

/// Ascending by numeric ts; unparseable timestamps sort last for `oldest`.
fn sort_replies(replies: &mut [ThreadMessage], order: ReplyOrder) {
    let key = |m: &ThreadMessage| parse_slack_ts(&m.ts).unwrap_or(f64::INFINITY);
    replies.sort_by(|a, b| key(a).total_cmp(&key(b)));
    if order == ReplyOrder::Newest {
        replies.reverse();
    }
}
