// src/lib.rs
pub mod auth_store;
pub mod authorize;
pub mod config;
pub mod connectors;
pub mod credential;
pub mod error;
pub mod mcp_server;
pub mod oauth;
pub mod transport;
pub mod upload;
pub mod utils;

// Re-export types from rmcp that users of the library need
pub use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, InitializeRequestParam,
    InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ServerCapabilities, Tool,
};

pub use crate::auth_store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use crate::config::ServerConfig;
pub use crate::connectors::dropbox::DropboxConnector;
pub use crate::credential::{Credential, TokenSet};
pub use crate::error::ConnectorError;
pub use crate::mcp_server::{JsonRpcHandler, McpServer};
pub use crate::transport::StdioTransport;

use async_trait::async_trait;

/// A tool provider sitting behind the MCP server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the unique name of the connector.
    fn name(&self) -> &'static str;

    /// Returns a description of the connector.
    fn description(&self) -> &'static str;

    /// Returns the MCP capabilities of this connector.
    async fn capabilities(&self) -> ServerCapabilities;

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError>;

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError>;

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
