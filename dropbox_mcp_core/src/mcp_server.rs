use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{Connector, ConnectorError};
use rmcp::model::*;

pub const SERVER_NAME: &str = "dropbox-mcp-server";

/// MCP server wrapping a single connector.
pub struct McpServer {
    connector: Box<dyn Connector>,
}

impl McpServer {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Handle initialize request
    pub async fn handle_initialize(
        &self,
        request: Option<InitializeRequestParam>,
    ) -> Result<InitializeResult, ConnectorError> {
        match request {
            Some(req) => info!(client = %req.client_info.name, "MCP server initializing"),
            None => info!("MCP server initializing"),
        }

        Ok(InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: self.connector.capabilities().await,
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Dropbox file management. Run dropbox_auth once to connect an account; other tools reuse the stored credential."
                    .to_string(),
            ),
        })
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
        self.connector.call_tool(request).await
    }

    pub async fn handle_list_prompts(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult, ConnectorError> {
        self.connector.list_prompts(request).await
    }

    pub async fn handle_list_resources(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult, ConnectorError> {
        self.connector.list_resources(request).await
    }
}

/// JSON-RPC 2.0 front end for [`McpServer`].
pub struct JsonRpcHandler {
    server: McpServer,
}

fn to_value<T: serde::Serialize>(r: T) -> Result<Value, ConnectorError> {
    serde_json::to_value(r).map_err(ConnectorError::SerdeJson)
}

/// `params` may be absent or `null` for list methods.
fn paginated(params: &Value) -> Result<Option<PaginatedRequestParam>, ConnectorError> {
    if params.is_null() {
        return Ok(None);
    }
    serde_json::from_value(params.clone())
        .map_err(|e| ConnectorError::InvalidParams(e.to_string()))
}

impl JsonRpcHandler {
    pub fn new(server: McpServer) -> Self {
        Self { server }
    }

    /// Process a JSON-RPC message. Notifications (no `id`) yield `None`.
    pub async fn handle_request(&self, request: Value) -> Option<Value> {
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        let Some(id) = request.get("id").cloned() else {
            debug!(method = %method, "notification received");
            return None;
        };
        let params = request.get("params").cloned().unwrap_or(Value::Null);
        info!(method = %method, "request");

        let result = self.dispatch(&method, params).await;

        Some(match result {
            Ok(result) => json!({
                "jsonrpc": "2.0",
                "result": result,
                "id": id,
            }),
            Err(e) => json!({
                "jsonrpc": "2.0",
                "error": e.to_jsonrpc_error(),
                "id": id,
            }),
        })
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, ConnectorError> {
        match method {
            "initialize" => {
                let req = serde_json::from_value::<InitializeRequestParam>(params).ok();
                to_value(self.server.handle_initialize(req).await?)
            }
            "ping" => Ok(json!({})),
            "tools/list" => to_value(self.server.handle_list_tools(paginated(&params)?).await?),
            "tools/call" => {
                let req = serde_json::from_value::<CallToolRequestParam>(params)
                    .map_err(|e| ConnectorError::InvalidParams(e.to_string()))?;
                to_value(self.server.handle_call_tool(req).await?)
            }
            "prompts/list" => to_value(self.server.handle_list_prompts(paginated(&params)?).await?),
            "resources/list" => {
                to_value(self.server.handle_list_resources(paginated(&params)?).await?)
            }
            other => Err(ConnectorError::MethodNotFound(other.to_string())),
        }
    }
}
