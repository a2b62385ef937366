use std::path::PathBuf;
use std::time::Duration;

use crate::auth_store::FileCredentialStore;

pub const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";
pub const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
pub const API_BASE: &str = "https://api.dropboxapi.com/2";
pub const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// How long the browser flow waits for the redirect.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Provider endpoints. Overridable so tests can point them at a local mock.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
    pub content_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            api_base: API_BASE.to_string(),
            content_base: CONTENT_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub credential_path: PathBuf,
    /// Used by `dropbox_auth` when the call carries no client id.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub endpoints: Endpoints,
    pub auth_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            credential_path: FileCredentialStore::default_path(),
            client_id: None,
            client_secret: None,
            endpoints: Endpoints::default(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Reads `DROPBOX_MCP_CONFIG`, `DROPBOX_CLIENT_ID` and `DROPBOX_CLIENT_SECRET`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(path) = non_empty_env("DROPBOX_MCP_CONFIG") {
            cfg.credential_path = PathBuf::from(path);
        }
        cfg.client_id = non_empty_env("DROPBOX_CLIENT_ID");
        cfg.client_secret = non_empty_env("DROPBOX_CLIENT_SECRET");
        cfg
    }

    pub fn with_credential_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_path = path.into();
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_client(mut self, client_id: Option<String>, client_secret: Option<String>) -> Self {
        self.client_id = client_id;
        self.client_secret = client_secret;
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
