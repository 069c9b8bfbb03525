//! The Slack connector: MCP tool definitions routed onto the two resolvers.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

use crate::config::SlackConfig;
use crate::error::ConnectorError;
use crate::gateway::SlackApi;
use crate::search::SearchResolver;
use crate::stats::RequestStats;
use crate::thread::ThreadResolver;
use crate::types::{ReplyOrder, SearchRequest, ThreadRequest};
use crate::utils::structured_result_with_text;
use crate::{
    CallToolRequestParam, CallToolResult, Connector, Implementation, InitializeRequestParam,
    InitializeResult, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
    ServerCapabilities, Tool,
};

pub const SEARCH_MESSAGES_TOOL: &str = "search_messages";
pub const GET_THREAD_REPLIES_TOOL: &str = "get_thread_replies";

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchMessagesInput {
    /// Slack search query. Slack modifiers such as `from:@user` or `before:2024-06-01` are passed through.
    pub query: String,
    /// Maximum number of messages to return (1-100).
    #[serde(default, alias = "limit")]
    #[schemars(range(min = 1, max = 100))]
    pub max_result_count: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetThreadRepliesInput {
    /// Channel id containing the thread, e.g. C024BE91L.
    pub channel_id: String,
    /// Timestamp of the thread's parent message, e.g. 1716932719.000123.
    pub thread_ts: String,
    /// Page size (1-1000, default 200).
    #[serde(default)]
    #[schemars(range(min = 1, max = 1000))]
    pub limit: Option<u32>,
    /// Cursor from a previous call's `nextCursor`.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Reply order within the page.
    #[serde(default)]
    pub order: Option<ReplyOrder>,
}

/// Scope injected into every search from process configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchScope {
    pub team_id: Option<String>,
    pub channel_ids: Vec<String>,
}

impl From<&SlackConfig> for SearchScope {
    fn from(config: &SlackConfig) -> Self {
        Self {
            team_id: config.team_id.clone(),
            channel_ids: config.channel_ids.clone(),
        }
    }
}

pub struct SlackConnector {
    search: SearchResolver,
    thread: ThreadResolver,
    scope: SearchScope,
}

impl SlackConnector {
    pub fn new(api: Arc<dyn SlackApi>, stats: Arc<RequestStats>, scope: SearchScope) -> Self {
        Self {
            search: SearchResolver::new(Arc::clone(&api), Arc::clone(&stats)),
            thread: ThreadResolver::new(api, stats),
            scope,
        }
    }

    async fn search_messages(&self, input: SearchMessagesInput) -> Result<CallToolResult, ConnectorError> {
        if input.max_result_count == Some(0) {
            return Err(ConnectorError::InvalidParams(
                "maxResultCount must be at least 1".to_string(),
            ));
        }
        let mut request = SearchRequest::new(input.query.as_str())
            .with_channels(self.scope.channel_ids.iter().cloned());
        request.max_result_count = input.max_result_count;
        request.team_id = self.scope.team_id.clone();

        let result = self.search.search(&request).await?;
        structured_result_with_text(&result, Some(input.query.as_str()))
    }

    async fn get_thread_replies(
        &self,
        input: GetThreadRepliesInput,
    ) -> Result<CallToolResult, ConnectorError> {
        if input.limit == Some(0) {
            return Err(ConnectorError::InvalidParams(
                "limit must be at least 1".to_string(),
            ));
        }
        let request = ThreadRequest {
            channel_id: input.channel_id,
            thread_ts: input.thread_ts,
            limit: input.limit,
            cursor: input.cursor,
            order: input.order.unwrap_or_default(),
        };

        let result = self.thread.thread_replies(&request).await?;
        structured_result_with_text(&result, None)
    }
}

fn input_schema<T: JsonSchema>() -> Result<Arc<Map<String, Value>>, ConnectorError> {
    match serde_json::to_value(schemars::schema_for!(T))? {
        Value::Object(map) => Ok(Arc::new(map)),
        _ => Err(ConnectorError::InternalError(
            "tool input schema is not an object".to_string(),
        )),
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(request: CallToolRequestParam) -> Result<T, ConnectorError> {
    let args = request.arguments.unwrap_or_default();
    serde_json::from_value(Value::Object(args))
        .map_err(|e| ConnectorError::InvalidParams(e.to_string()))
}

#[async_trait]
impl Connector for SlackConnector {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn description(&self) -> &'static str {
        "Search Slack messages and read thread replies."
    }

    async fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(Default::default()),
            ..Default::default()
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParam,
    ) -> Result<InitializeResult, ConnectorError> {
        Ok(InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: self.capabilities().await,
            server_info: Implementation {
                name: "slackbridge".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use search_messages to find Slack messages, then get_thread_replies with a result's channelId and threadTs to read the conversation. Follow nextCursor for more replies."
                    .to_string(),
            ),
        })
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError> {
        let tools = vec![
            Tool {
                name: Cow::Borrowed(SEARCH_MESSAGES_TOOL),
                title: None,
                description: Some(Cow::Borrowed(
                    "Search Slack messages, restricted to the configured channels when set. Results are ordered by relevance.",
                )),
                input_schema: input_schema::<SearchMessagesInput>()?,
                output_schema: None,
                annotations: None,
                icons: None,
            },
            Tool {
                name: Cow::Borrowed(GET_THREAD_REPLIES_TOOL),
                title: None,
                description: Some(Cow::Borrowed(
                    "Fetch one page of replies for a thread. Returns the parent message when it is on the page, plus nextCursor when more replies exist.",
                )),
                input_schema: input_schema::<GetThreadRepliesInput>()?,
                output_schema: None,
                annotations: None,
                icons: None,
            },
        ];

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError> {
        debug!(tool = %request.name, "Calling tool");
        match request.name.as_ref() {
            SEARCH_MESSAGES_TOOL => {
                let input: SearchMessagesInput = parse_args(request)?;
                self.search_messages(input).await
            }
            GET_THREAD_REPLIES_TOOL => {
                let input: GetThreadRepliesInput = parse_args(request)?;
                self.get_thread_replies(input).await
            }
            _ => Err(ConnectorError::ToolNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::FakeSlack;
    use serde_json::json;

    fn connector(fake: Arc<FakeSlack>, scope: SearchScope) -> SlackConnector {
        SlackConnector::new(fake, Arc::new(RequestStats::new()), scope)
    }

    fn call(name: &'static str, args: Value) -> CallToolRequestParam {
        CallToolRequestParam {
            name: Cow::Borrowed(name),
            arguments: args.as_object().cloned(),
        }
    }

    #[tokio::test]
    async fn lists_both_tools_with_schemas() {
        let c = connector(Arc::new(FakeSlack::default()), SearchScope::default());
        let tools = c.list_tools(None).await.unwrap().tools;
        let names: Vec<_> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, vec![SEARCH_MESSAGES_TOOL, GET_THREAD_REPLIES_TOOL]);

        let search_props = tools[0].input_schema["properties"].as_object().unwrap();
        assert!(search_props.contains_key("query"));
        assert!(search_props.contains_key("maxResultCount"));
        let thread_required = tools[1].input_schema["required"].as_array().unwrap();
        assert!(thread_required.contains(&json!("channelId")));
        assert!(thread_required.contains(&json!("threadTs")));
    }

    #[tokio::test]
    async fn search_injects_configured_scope() {
        let fake = Arc::new(FakeSlack::default().with_channel("C1", "eng"));
        let c = connector(
            Arc::clone(&fake),
            SearchScope {
                team_id: Some("T1".to_string()),
                channel_ids: vec!["C1".to_string()],
            },
        );

        let result = c
            .call_tool(call(SEARCH_MESSAGES_TOOL, json!({"query": "deploy", "limit": 5})))
            .await
            .unwrap();

        assert_eq!(fake.search_queries(), vec!["deploy in:eng"]);
        assert_eq!(fake.search_counts(), vec![Some(5)]);
        assert_eq!(fake.search_teams(), vec![Some("T1".to_string())]);
        let out = result.structured_content.unwrap();
        assert_eq!(out["messages"], json!([]));
        assert_eq!(out["no_results"], json!(true));
    }

    #[tokio::test]
    async fn thread_tool_maps_camel_case_arguments() {
        let fake = Arc::new(FakeSlack::default());
        let c = connector(Arc::clone(&fake), SearchScope::default());

        c.call_tool(call(
            GET_THREAD_REPLIES_TOOL,
            json!({"channelId": "C1", "threadTs": "100.0", "limit": 10, "cursor": "abc", "order": "newest"}),
        ))
        .await
        .unwrap();

        assert_eq!(
            fake.thread_calls(),
            vec![(
                "C1".to_string(),
                "100.0".to_string(),
                Some(10),
                Some("abc".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn bad_arguments_are_invalid_params() {
        let c = connector(Arc::new(FakeSlack::default()), SearchScope::default());

        let missing = c
            .call_tool(call(GET_THREAD_REPLIES_TOOL, json!({"channelId": "C1"})))
            .await
            .unwrap_err();
        assert!(matches!(missing, ConnectorError::InvalidParams(_)));

        let zero = c
            .call_tool(call(SEARCH_MESSAGES_TOOL, json!({"query": "x", "maxResultCount": 0})))
            .await
            .unwrap_err();
        assert_eq!(zero.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let c = connector(Arc::new(FakeSlack::default()), SearchScope::default());
        let err = c.call_tool(call("post_message", json!({}))).await.unwrap_err();
        assert!(matches!(err, ConnectorError::ToolNotFound));
    }
}
