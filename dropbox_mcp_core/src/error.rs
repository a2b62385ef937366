// src/error.rs
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("state mismatch")]
    StateMismatch,

    #[error("authorization failed: {0}")]
    AuthorizationDenied(String),

    #[error("failed to open browser: {0}")]
    BrowserLaunch(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Dropbox API error ({status}): {summary}")]
    Api { status: u16, summary: String },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Parse error")]
    ParseError,

    #[error("Other error: {0}")]
    Other(String),
}

impl ConnectorError {
    pub fn code_str(&self) -> &'static str {
        match self {
            ConnectorError::InvalidParams(_) => "invalid_params",
            ConnectorError::Authentication(_) => "auth_failed",
            ConnectorError::StateMismatch => "state_mismatch",
            ConnectorError::AuthorizationDenied(_) => "authorization_denied",
            ConnectorError::BrowserLaunch(_) => "browser_launch_failed",
            ConnectorError::Timeout(_) => "timeout",
            ConnectorError::ToolNotFound(_) => "tool_not_found",
            ConnectorError::MethodNotFound(_) => "method_not_found",
            ConnectorError::ParseError => "parse_error",
            ConnectorError::HttpRequest(_) | ConnectorError::Api { .. } => "upstream_error",
            ConnectorError::Upload(_) => "upload_failed",
            ConnectorError::Store(_) => "store_error",
            _ => "internal_error",
        }
    }

    /// True for the failures a user can fix by running the authorization flow again.
    pub fn is_retryable_authorization(&self) -> bool {
        matches!(
            self,
            ConnectorError::StateMismatch
                | ConnectorError::AuthorizationDenied(_)
                | ConnectorError::Timeout(_)
        )
    }

    pub fn to_jsonrpc_error(&self) -> serde_json::Value {
        let code = match self {
            ConnectorError::InvalidParams(_) => -32602,
            ConnectorError::ToolNotFound(_) | ConnectorError::MethodNotFound(_) => -32601,
            ConnectorError::ParseError => -32700,
            _ => -32603,
        };

        json!({
            "code": code,
            "message": self.to_string(),
            "data": { "kind": self.code_str() },
        })
    }
}
