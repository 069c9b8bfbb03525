// src/lib.rs
pub mod channels;
pub mod config;
pub mod connector;
pub mod error;
pub mod gateway;
pub mod mcp_server;
pub mod permalink;
pub mod search;
pub mod stats;
pub mod thread;
pub mod transport;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export the rmcp model types that appear in the Connector interface
pub use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, InitializeRequestParam,
    InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ServerCapabilities, Tool,
};

pub use crate::config::{ConfigError, SlackConfig};
pub use crate::connector::SlackConnector;
pub use crate::error::{ConnectorError, ErrorKind};
pub use crate::gateway::{RetryPolicy, SlackApi, SlackGateway};
pub use crate::search::SearchResolver;
pub use crate::stats::{RequestStats, StatsSnapshot};
pub use crate::thread::ThreadResolver;
pub use crate::types::{
    NormalizedMessage, ReplyOrder, SearchRequest, SearchResult, ThreadMessage, ThreadRequest,
    ThreadResult,
};

use async_trait::async_trait;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the unique name of the connector (acting as the MCP server name).
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn capabilities(&self) -> ServerCapabilities;

    async fn initialize(
        &self,
        request: InitializeRequestParam,
    ) -> Result<InitializeResult, ConnectorError>;

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError>;

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError>;

    /// No resources are exposed by default.
    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult, ConnectorError> {
        Ok(ListResourcesResult {
            resources: vec![],
            next_cursor: None,
        })
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult, ConnectorError> {
        Ok(ListPromptsResult {
            prompts: vec![],
            next_cursor: None,
        })
    }
}
