//! Message search across an optional channel scope.
//!
//! Slack's query syntax has no OR across `in:` filters, so a scoped search
//! issues one query per resolved channel and merges the pages by score.

use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::channels::{resolve_channel_names, ResolvedChannel};
use crate::error::ConnectorError;
use crate::gateway::{SearchEnvelope, SearchSort, SlackApi};
use crate::permalink::thread_ts_from_permalink;
use crate::stats::RequestStats;
use crate::types::{require_non_empty, slack_ts_to_iso, NormalizedMessage, SearchRequest, SearchResult};

#[derive(Debug, Default, Deserialize)]
struct RawMatch {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    channel: Option<RawChannel>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChannel {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// One validated upstream page.
#[derive(Debug, Default)]
struct SearchPage {
    messages: Vec<NormalizedMessage>,
    total: u64,
    has_more: bool,
}

pub struct SearchResolver {
    api: Arc<dyn SlackApi>,
    stats: Arc<RequestStats>,
}

impl SearchResolver {
    pub fn new(api: Arc<dyn SlackApi>, stats: Arc<RequestStats>) -> Self {
        Self { api, stats }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult, ConnectorError> {
        let start = Instant::now();
        let outcome = self.run(request).await;
        self.stats.record_latency(start.elapsed().as_millis() as u64);

        match &outcome {
            Ok(result) => {
                self.stats.record_success();
                info!(
                    event = "search_success",
                    message_count = result.messages.len(),
                    total = result.total_result_count,
                    has_more = result.has_more,
                    "Search completed"
                );
            }
            Err(e) => {
                self.stats.record_failure();
                error!(
                    event = "search_failure",
                    error_kind = e.kind().as_str(),
                    error = %e,
                    "Search failed"
                );
            }
        }
        outcome
    }

    async fn run(&self, request: &SearchRequest) -> Result<SearchResult, ConnectorError> {
        let query = require_non_empty("query", &request.query)?;
        let mut channel_ids = request
            .channel_ids
            .iter()
            .map(|id| require_non_empty("channel id", id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut seen_ids = HashSet::new();
        channel_ids.retain(|id| seen_ids.insert(id.clone()));
        let max = request.max_result_count;
        let team = request.team_id.as_deref();

        let channels = if channel_ids.is_empty() {
            Vec::new()
        } else {
            let mut resolved = resolve_channel_names(self.api.as_ref(), &channel_ids).await;
            let mut seen_names = HashSet::new();
            resolved.retain(|channel| seen_names.insert(channel.name.clone()));
            resolved
        };

        if channels.is_empty() {
            if !channel_ids.is_empty() {
                warn!(
                    requested = channel_ids.len(),
                    "No channel names resolved; falling back to unscoped search"
                );
            }
            let envelope = self
                .api
                .search(&query, max, Some(SearchSort::Score), team)
                .await?;
            let page = page_from_envelope(envelope, None)?;
            return Ok(merge_pages(vec![page], max));
        }

        let calls = channels.iter().map(|channel| {
            let scoped = format!("{} in:{}", query, channel.name);
            async move {
                let outcome = self
                    .api
                    .search(&scoped, max, Some(SearchSort::Score), team)
                    .await
                    .and_then(|env| page_from_envelope(env, Some(channel)));
                (channel, outcome)
            }
        });

        let mut pages = Vec::with_capacity(channels.len());
        let mut first_error: Option<ConnectorError> = None;
        for (channel, outcome) in join_all(calls).await {
            match outcome {
                Ok(page) => pages.push(page),
                Err(e) => {
                    warn!(
                        event = "channel_search_failed",
                        channel_id = %channel.id,
                        channel_name = %channel.name,
                        error_kind = e.kind().as_str(),
                        error = %e,
                        "Dropping channel from merged search results"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if pages.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                ConnectorError::InternalError("no channel searches were issued".to_string())
            }));
        }
        Ok(merge_pages(pages, max))
    }
}

/// Validate a `search.messages` envelope and normalize its matches.
fn page_from_envelope(
    envelope: SearchEnvelope,
    channel: Option<&ResolvedChannel>,
) -> Result<SearchPage, ConnectorError> {
    if !envelope.ok {
        return Err(ConnectorError::InvalidResponse(
            "search.messages did not report success".to_string(),
        ));
    }
    let messages = envelope.messages.ok_or_else(|| {
        ConnectorError::InvalidResponse("search.messages is missing 'messages'".to_string())
    })?;
    let matches = match &messages.matches {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(ConnectorError::InvalidResponse(
                "search.messages 'messages.matches' is not an array".to_string(),
            ))
        }
    };

    let normalized = matches
        .iter()
        .filter_map(|raw| match serde_json::from_value::<RawMatch>(raw.clone()) {
            Ok(m) => Some(normalize_match(m, channel)),
            Err(e) => {
                debug!(error = %e, "Skipping unparseable search match");
                None
            }
        })
        .collect();

    Ok(SearchPage {
        messages: normalized,
        total: messages.reported_total(),
        has_more: messages.has_more_pages(),
    })
}

fn normalize_match(m: RawMatch, scope: Option<&ResolvedChannel>) -> NormalizedMessage {
    let (channel_id, channel_name) = match m.channel {
        Some(c) => (c.id, c.name),
        None => (None, None),
    };
    NormalizedMessage {
        text: m.text.unwrap_or_default(),
        timestamp: m.ts.as_deref().map(slack_ts_to_iso).unwrap_or_default(),
        channel_id: channel_id
            .or_else(|| scope.map(|c| c.id.clone()))
            .unwrap_or_default(),
        channel_name: channel_name.or_else(|| scope.map(|c| c.name.clone())),
        user_id: m.user.unwrap_or_default(),
        user_name: m.username.filter(|u| !u.is_empty()),
        score: m.score,
        thread_ts: m.permalink.as_deref().and_then(thread_ts_from_permalink),
    }
}

fn score_of(m: &NormalizedMessage) -> f64 {
    m.score.filter(|s| s.is_finite()).unwrap_or(0.0)
}

/// Merge pages by descending score. `sort_by` is stable, so ties keep
/// channel order and then upstream order.
///
/// `total` sums each page's reported total; a message matching more than one
/// scoped query would be counted twice.
fn merge_pages(pages: Vec<SearchPage>, max: Option<u32>) -> SearchResult {
    let total: u64 = pages.iter().map(|p| p.total).sum();
    let upstream_has_more = pages.iter().any(|p| p.has_more);

    let mut messages: Vec<NormalizedMessage> =
        pages.into_iter().flat_map(|p| p.messages).collect();
    messages.sort_by(|a, b| score_of(b).total_cmp(&score_of(a)));

    let merged_len = messages.len();
    let mut truncated = false;
    if let Some(max) = max {
        let max = max as usize;
        if merged_len > max {
            messages.truncate(max);
            truncated = true;
        }
    }

    SearchResult {
        messages,
        total_result_count: total,
        has_more: upstream_has_more || truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::FakeSlack;
    use serde_json::json;

    fn resolver(fake: Arc<FakeSlack>) -> (SearchResolver, Arc<RequestStats>) {
        let stats = Arc::new(RequestStats::new());
        (SearchResolver::new(fake, Arc::clone(&stats)), stats)
    }

    fn envelope(matches: Value, total: u64) -> Value {
        json!({
            "ok": true,
            "messages": {
                "matches": matches,
                "total": total,
                "paging": {"page": 1, "pages": 1, "total": total}
            }
        })
    }

    #[tokio::test]
    async fn unscoped_search_issues_one_call_with_trimmed_query() {
        let fake = Arc::new(FakeSlack::default());
        let (resolver, stats) = resolver(Arc::clone(&fake));

        let result = resolver.search(&SearchRequest::new("  deploy ")).await.unwrap();

        assert_eq!(fake.search_queries(), vec!["deploy"]);
        assert!(result.messages.is_empty());
        assert_eq!(stats.snapshot().successful_requests, 1);
    }

    #[tokio::test]
    async fn rejects_blank_query_without_calling_upstream() {
        let fake = Arc::new(FakeSlack::default());
        let (resolver, stats) = resolver(Arc::clone(&fake));

        let err = resolver.search(&SearchRequest::new("   ")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(fake.search_queries().is_empty());
        assert_eq!(stats.snapshot().failed_requests, 1);
    }

    #[tokio::test]
    async fn rejects_blank_channel_id_before_resolution() {
        let fake = Arc::new(FakeSlack::default().with_channel("C1", "eng"));
        let (resolver, _) = resolver(Arc::clone(&fake));

        let err = resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", " "]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(fake.channel_lookups().is_empty());
        assert!(fake.search_queries().is_empty());
    }

    #[tokio::test]
    async fn searches_only_resolved_channels() {
        let fake = Arc::new(FakeSlack::default().with_channel("C1", "eng"));
        let (resolver, _) = resolver(Arc::clone(&fake));

        resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", "C2"]))
            .await
            .unwrap();

        assert_eq!(fake.search_queries(), vec!["deploy in:eng"]);
    }

    #[tokio::test]
    async fn falls_back_to_unscoped_when_nothing_resolves() {
        let fake = Arc::new(FakeSlack::default());
        let (resolver, _) = resolver(Arc::clone(&fake));

        resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", "C2"]))
            .await
            .unwrap();

        assert_eq!(fake.search_queries(), vec!["deploy"]);
    }

    #[tokio::test]
    async fn merges_channels_by_descending_score() {
        let fake = Arc::new(
            FakeSlack::default()
                .with_channel("C1", "eng")
                .with_channel("C2", "ops")
                .with_search(
                    "deploy in:eng",
                    envelope(
                        json!([
                            {"ts": "1.0", "text": "eng-low", "score": 0.2},
                            {"ts": "2.0", "text": "eng-none"}
                        ]),
                        5,
                    ),
                )
                .with_search(
                    "deploy in:ops",
                    envelope(
                        json!([
                            {"ts": "3.0", "text": "ops-high", "score": 0.9},
                            {"ts": "4.0", "text": "ops-low", "score": 0.2}
                        ]),
                        7,
                    ),
                ),
        );
        let (resolver, _) = resolver(Arc::clone(&fake));

        let result = resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", "C2"]))
            .await
            .unwrap();

        let texts: Vec<_> = result.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["ops-high", "eng-low", "ops-low", "eng-none"]);
        assert_eq!(result.total_result_count, 12);
        assert!(!result.has_more);
        assert_eq!(result.messages[0].channel_id, "C2");
        assert_eq!(result.messages[0].channel_name.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn truncation_sets_has_more() {
        let fake = Arc::new(FakeSlack::default().with_search(
            "deploy",
            envelope(
                json!([
                    {"ts": "1.0", "text": "a", "score": 3.0},
                    {"ts": "2.0", "text": "b", "score": 2.0},
                    {"ts": "3.0", "text": "c", "score": 1.0}
                ]),
                3,
            ),
        ));
        let (resolver, _) = resolver(Arc::clone(&fake));

        let result = resolver
            .search(&SearchRequest::new("deploy").with_max_results(2))
            .await
            .unwrap();

        assert_eq!(result.messages.len(), 2);
        assert!(result.has_more);
        assert_eq!(result.total_result_count, 3);
        assert_eq!(fake.search_counts(), vec![Some(2)]);
    }

    #[tokio::test]
    async fn upstream_paging_sets_has_more() {
        let fake = Arc::new(FakeSlack::default().with_search(
            "deploy",
            json!({
                "ok": true,
                "messages": {"matches": [], "total": 40, "paging": {"page": 1, "pages": 2}}
            }),
        ));
        let (resolver, _) = resolver(Arc::clone(&fake));

        let result = resolver.search(&SearchRequest::new("deploy")).await.unwrap();

        assert!(result.has_more);
        assert_eq!(result.total_result_count, 40);
    }

    #[tokio::test]
    async fn one_failed_channel_does_not_fail_the_search() {
        let fake = Arc::new(
            FakeSlack::default()
                .with_channel("C1", "eng")
                .with_channel("C2", "ops")
                .with_search(
                    "deploy in:ops",
                    envelope(json!([{"ts": "3.0", "text": "ops", "score": 1.0}]), 1),
                )
                .with_search_failure("deploy in:eng", || ConnectorError::UpstreamBusiness {
                    code: "not_in_channel".to_string(),
                }),
        );
        let (resolver, stats) = resolver(Arc::clone(&fake));

        let result = resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", "C2"]))
            .await
            .unwrap();

        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.total_result_count, 1);
        assert_eq!(stats.snapshot().successful_requests, 1);
    }

    #[tokio::test]
    async fn invalid_channel_envelope_is_dropped() {
        let fake = Arc::new(
            FakeSlack::default()
                .with_channel("C1", "eng")
                .with_channel("C2", "ops")
                .with_search("deploy in:eng", json!({"ok": true, "messages": {"matches": null}}))
                .with_search(
                    "deploy in:ops",
                    envelope(json!([{"ts": "3.0", "text": "ops"}]), 1),
                ),
        );
        let (resolver, _) = resolver(Arc::clone(&fake));

        let result = resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", "C2"]))
            .await
            .unwrap();

        assert_eq!(result.messages.len(), 1);
    }

    #[tokio::test]
    async fn all_channels_failing_propagates_first_error() {
        let fake = Arc::new(
            FakeSlack::default()
                .with_channel("C1", "eng")
                .with_channel("C2", "ops")
                .with_search_failure("deploy in:eng", || ConnectorError::RateLimit { attempts: 4 })
                .with_search_failure("deploy in:ops", || ConnectorError::UpstreamBusiness {
                    code: "not_in_channel".to_string(),
                }),
        );
        let (resolver, stats) = resolver(Arc::clone(&fake));

        let err = resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", "C2"]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(stats.snapshot().failed_requests, 1);
    }

    #[tokio::test]
    async fn unscoped_invalid_envelope_is_a_hard_failure() {
        let fake = Arc::new(FakeSlack::default().with_search(
            "deploy",
            json!({"ok": true, "messages": {"matches": {"oops": true}}}),
        ));
        let (resolver, _) = resolver(Arc::clone(&fake));

        let err = resolver.search(&SearchRequest::new("deploy")).await.unwrap_err();

        assert!(matches!(err, ConnectorError::InvalidResponse(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn normalizes_match_fields() {
        let fake = Arc::new(FakeSlack::default().with_search(
            "deploy",
            envelope(
                json!([{
                    "ts": "1716932800.000200",
                    "text": "shipped",
                    "user": "U1",
                    "username": "alice",
                    "score": 0.5,
                    "channel": {"id": "C9", "name": "eng"},
                    "permalink": "https://acme.slack.com/archives/C9/p1716932800000200?thread_ts=1716932719.000123"
                }]),
                1,
            ),
        ));
        let (resolver, _) = resolver(Arc::clone(&fake));

        let result = resolver.search(&SearchRequest::new("deploy")).await.unwrap();
        let m = &result.messages[0];

        assert_eq!(m.text, "shipped");
        assert_eq!(m.timestamp, "2024-05-28T21:46:40.000Z");
        assert_eq!(m.channel_id, "C9");
        assert_eq!(m.channel_name.as_deref(), Some("eng"));
        assert_eq!(m.user_id, "U1");
        assert_eq!(m.user_name.as_deref(), Some("alice"));
        assert_eq!(m.score, Some(0.5));
        assert_eq!(m.thread_ts.as_deref(), Some("1716932719.000123"));
    }

    #[tokio::test]
    async fn duplicate_channel_ids_search_once() {
        let fake = Arc::new(
            FakeSlack::default().with_channel("C1", "eng").with_search(
                "deploy in:eng",
                envelope(json!([{"ts": "1.0", "text": "a", "score": 1.0}]), 1),
            ),
        );
        let (resolver, _) = resolver(Arc::clone(&fake));

        let result = resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", " C1 ", "C1"]))
            .await
            .unwrap();

        assert_eq!(fake.channel_lookups(), vec!["C1"]);
        assert_eq!(fake.search_queries(), vec!["deploy in:eng"]);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.total_result_count, 1);
    }

    #[tokio::test]
    async fn ids_sharing_a_name_search_once() {
        let fake = Arc::new(
            FakeSlack::default()
                .with_channel("C1", "eng")
                .with_channel("C2", "eng")
                .with_search(
                    "deploy in:eng",
                    envelope(json!([{"ts": "1.0", "text": "a", "score": 1.0}]), 1),
                ),
        );
        let (resolver, _) = resolver(Arc::clone(&fake));

        let result = resolver
            .search(&SearchRequest::new("deploy").with_channels(["C1", "C2"]))
            .await
            .unwrap();

        assert_eq!(fake.search_queries(), vec!["deploy in:eng"]);
        assert_eq!(result.total_result_count, 1);
    }

    #[tokio::test]
    async fn passes_team_id_upstream() {
        let fake = Arc::new(FakeSlack::default());
        let (resolver, _) = resolver(Arc::clone(&fake));

        resolver
            .search(&SearchRequest::new("deploy").with_team("T1"))
            .await
            .unwrap();

        assert_eq!(fake.search_teams(), vec![Some("T1".to_string())]);
    }
}
