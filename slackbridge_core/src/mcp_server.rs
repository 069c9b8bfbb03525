use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    CallToolRequestParam, CallToolResult, Connector, ConnectorError, InitializeRequestParam,
    InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam,
};

/// MCP server wrapping a single connector.
pub struct McpServer {
    connector: Arc<dyn Connector>,
}

impl McpServer {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub async fn handle_initialize(
        &self,
        request: InitializeRequestParam,
    ) -> Result<InitializeResult, ConnectorError> {
        info!(
            client = %request.client_info.name,
            client_version = %request.client_info.version,
            "MCP client initializing"
        );
        self.connector.initialize(request).await
    }

    pub async fn handle_list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError> {
        self.connector.list_tools(request).await
    }

    pub async fn handle_call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError> {
        info!(tool = %request.name, "Tool call");
        self.connector.call_tool(request).await
    }

    pub async fn handle_list_resources(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult, ConnectorError> {
        self.connector.list_resources(request).await
    }

    pub async fn handle_list_prompts(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult, ConnectorError> {
        self.connector.list_prompts(request).await
    }
}

/// JSON-RPC 2.0 handler for MCP
pub struct JsonRpcHandler {
    server: McpServer,
}

fn params_of<T: for<'de> serde::Deserialize<'de>>(params: Value) -> Result<T, ConnectorError> {
    serde_json::from_value(params).map_err(|e| ConnectorError::InvalidParams(e.to_string()))
}

fn to_result<T: Serialize>(outcome: Result<T, ConnectorError>) -> Result<Value, Value> {
    outcome
        .and_then(|r| serde_json::to_value(r).map_err(ConnectorError::SerdeJson))
        .map_err(|e| e.to_jsonrpc_error())
}

/// Paginated list requests may arrive with no params, `{}`, or `null`.
fn paginated(params: Value) -> Result<Option<PaginatedRequestParam>, ConnectorError> {
    if params.is_null() {
        return Ok(None);
    }
    params_of(params)
}

impl JsonRpcHandler {
    pub fn new(server: McpServer) -> Self {
        Self { server }
    }

    /// Process a JSON-RPC message. Notifications (no `id`) get no response.
    pub async fn handle_request(&self, request: Value) -> Option<Value> {
        let id = request.get("id").cloned();
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = id else {
            debug!(method = %method, "Received notification");
            return None;
        };

        let result = match method.as_str() {
            "initialize" => match params_of::<InitializeRequestParam>(params) {
                Ok(req) => to_result(self.server.handle_initialize(req).await),
                Err(e) => Err(e.to_jsonrpc_error()),
            },
            "ping" => Ok(json!({})),
            "tools/list" => match paginated(params) {
                Ok(req) => to_result(self.server.handle_list_tools(req).await),
                Err(e) => Err(e.to_jsonrpc_error()),
            },
            "tools/call" => match params_of::<CallToolRequestParam>(params) {
                Ok(req) => to_result(self.server.handle_call_tool(req).await),
                Err(e) => Err(e.to_jsonrpc_error()),
            },
            "resources/list" => match paginated(params) {
                Ok(req) => to_result(self.server.handle_list_resources(req).await),
                Err(e) => Err(e.to_jsonrpc_error()),
            },
            "prompts/list" => match paginated(params) {
                Ok(req) => to_result(self.server.handle_list_prompts(req).await),
                Err(e) => Err(e.to_jsonrpc_error()),
            },
            other => {
                warn!(method = %other, "Unknown JSON-RPC method");
                Err(ConnectorError::MethodNotFound.to_jsonrpc_error())
            }
        };

        Some(match result {
            Ok(result) => json!({
                "jsonrpc": "2.0",
                "result": result,
                "id": id,
            }),
            Err(error) => json!({
                "jsonrpc": "2.0",
                "error": error,
                "id": id,
            }),
        })
    }
}
