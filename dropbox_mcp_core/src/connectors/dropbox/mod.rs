pub mod client;
pub mod types;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rmcp::model::*;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::auth_store::{CredentialStore, FileCredentialStore};
use crate::authorize::{AuthorizationFlow, BrowserLauncher, SystemBrowser};
use crate::config::ServerConfig;
use crate::credential::Credential;
use crate::error::ConnectorError;
use crate::oauth::{self, HttpTokenEndpoint, TokenEndpoint};
use crate::utils::structured_result_with_text;
use crate::Connector;

use self::client::DropboxClient;
use self::types::{CommitInfo, SharedLinkSettings, WriteMode};

/// Routes the `dropbox_*` tools onto the Dropbox API, keeping the single
/// credential record fresh along the way.
pub struct DropboxConnector {
    config: ServerConfig,
    store: Arc<dyn CredentialStore>,
    token_endpoint: Arc<dyn TokenEndpoint>,
    browser: Arc<dyn BrowserLauncher>,
    http: reqwest::Client,
    credential: Mutex<Credential>,
}

impl DropboxConnector {
    /// Loads the stored credential once; later changes are saved back through `store`.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn CredentialStore>,
        token_endpoint: Arc<dyn TokenEndpoint>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Result<Self, ConnectorError> {
        let credential = store.load()?;
        Ok(Self {
            config,
            store,
            token_endpoint,
            browser,
            http: reqwest::Client::new(),
            credential: Mutex::new(credential),
        })
    }

    /// Production wiring: file store, HTTP token endpoint, system browser.
    pub fn from_config(config: ServerConfig) -> Result<Self, ConnectorError> {
        let store = Arc::new(FileCredentialStore::new(config.credential_path.clone()));
        let endpoint = Arc::new(HttpTokenEndpoint::new(config.endpoints.token_url.clone()));
        Self::new(config, store, endpoint, Arc::new(SystemBrowser))
    }

    pub async fn credential(&self) -> Credential {
        self.credential.lock().await.clone()
    }

    fn client_for(&self, cred: &Credential) -> DropboxClient {
        DropboxClient::new(
            self.http.clone(),
            cred.access_token.clone(),
            &self.config.endpoints,
        )
    }

    /// Refreshes the token when it is close to expiry, then hands out a client.
    async fn authorized_client(&self) -> Result<DropboxClient, ConnectorError> {
        let mut cred = self.credential.lock().await;
        if cred.needs_refresh() {
            let tokens = oauth::refresh(
                self.token_endpoint.as_ref(),
                &cred.client_id,
                &cred.client_secret,
                &cred.refresh_token,
            )
            .await?;
            cred.update_tokens(tokens);
            self.store.save(&cred)?;
        }
        if !cred.is_valid() {
            return Err(ConnectorError::Authentication(
                "invalid or expired token".to_string(),
            ));
        }
        Ok(self.client_for(&cred))
    }

    async fn auth(&self, args: &JsonObject) -> Result<Value, ConnectorError> {
        let client_id = opt_str(args, "client_id")
            .map(str::to_string)
            .or_else(|| self.config.client_id.clone());
        let client_secret = opt_str(args, "client_secret")
            .map(str::to_string)
            .or_else(|| self.config.client_secret.clone());
        let (Some(client_id), Some(client_secret)) = (client_id, client_secret) else {
            return Err(ConnectorError::InvalidParams(
                "client_id and client_secret are required (provide as parameters or environment variables)"
                    .to_string(),
            ));
        };

        let flow = AuthorizationFlow::new(
            self.config.endpoints.authorize_url.clone(),
            self.token_endpoint.clone(),
            self.browser.clone(),
        )
        .with_timeout(self.config.auth_timeout);
        let tokens = flow
            .begin_authorization(&client_id, &client_secret)
            .await
            .map_err(|e| {
                if e.is_retryable_authorization() {
                    warn!(kind = e.code_str(), "authorization attempt failed, dropbox_auth can be retried");
                } else {
                    warn!(kind = e.code_str(), "authorization attempt failed");
                }
                e
            })?;

        let mut cred = self.credential.lock().await;
        cred.client_id = client_id;
        cred.client_secret = client_secret;
        cred.update_tokens(tokens);
        self.store.save(&cred)?;
        info!("dropbox credential stored");

        Ok(json!({
            "status": "authenticated",
            "message": "Successfully authenticated with Dropbox",
        }))
    }

    async fn check_auth(&self) -> Result<Value, ConnectorError> {
        let cred = self.credential().await;
        if !cred.is_valid() {
            return Ok(json!({
                "authenticated": false,
                "message": "Not authenticated. Please run dropbox_auth first.",
            }));
        }
        let client = self.client_for(&cred);
        if let Err(e) = client.check_user().await {
            warn!(kind = e.code_str(), "token rejected by check/user");
            return Ok(json!({
                "authenticated": false,
                "message": "Token is invalid or expired. Please re-authenticate.",
            }));
        }
        Ok(json!({
            "authenticated": true,
            "message": "Authenticated with Dropbox",
            "expires_at": cred.expires_at,
        }))
    }

    async fn dispatch(&self, name: &str, args: &JsonObject) -> Result<Value, ConnectorError> {
        match name {
            "dropbox_auth" => self.auth(args).await,
            "dropbox_check_auth" => self.check_auth().await,
            "dropbox_list" => {
                let path = opt_str(args, "path").unwrap_or("");
                let entries = self.authorized_client().await?.list_folder(path).await?;
                Ok(Value::Array(
                    entries.iter().map(|e| Value::Object(e.to_entry())).collect(),
                ))
            }
            "dropbox_search" => {
                let query = required_str(args, "query")?;
                let path = opt_str(args, "path");
                let matches = self.authorized_client().await?.search(query, path).await?;
                Ok(Value::Array(
                    matches
                        .iter()
                        .filter_map(|e| e.to_search_hit().map(Value::Object))
                        .collect(),
                ))
            }
            "dropbox_get_metadata" => {
                let path = required_str(args, "path")?;
                let meta = self.authorized_client().await?.get_metadata(path).await?;
                Ok(Value::Object(meta.to_detail()))
            }
            "dropbox_download" => {
                let path = required_str(args, "path")?;
                let data = self.authorized_client().await?.download(path).await?;
                Ok(download_payload(data))
            }
            "dropbox_upload" => {
                let path = required_str(args, "path")?;
                let content = required_str(args, "content")?;
                let mode = opt_str(args, "mode").unwrap_or("add");
                let mode = WriteMode::parse(mode).ok_or_else(|| {
                    ConnectorError::InvalidParams(format!(
                        "mode must be 'add' or 'overwrite', got '{}'",
                        mode
                    ))
                })?;
                let data = decode_content(content, opt_str(args, "encoding"))?;
                let commit = CommitInfo::new(path, mode);
                let meta = self.authorized_client().await?.upload(&commit, data).await?;
                Ok(Value::Object(meta.summary()))
            }
            "dropbox_create_folder" => {
                let path = required_str(args, "path")?;
                let folder = self.authorized_client().await?.create_folder(path).await?;
                Ok(json!({
                    "name": folder.name,
                    "path": folder.path(),
                    "id": folder.id,
                }))
            }
            "dropbox_move" | "dropbox_copy" => {
                let (Some(from), Some(to)) = (opt_str(args, "from_path"), opt_str(args, "to_path"))
                else {
                    return Err(ConnectorError::InvalidParams(
                        "from_path and to_path parameters are required".to_string(),
                    ));
                };
                let client = self.authorized_client().await?;
                let meta = if name == "dropbox_move" {
                    client.move_entry(from, to).await?
                } else {
                    client.copy_entry(from, to).await?
                };
                Ok(Value::Object(meta.to_entry()))
            }
            "dropbox_delete" => {
                let path = required_str(args, "path")?;
                self.authorized_client().await?.delete(path).await?;
                Ok(json!({
                    "status": "success",
                    "message": format!("Successfully deleted {}", path),
                }))
            }
            "dropbox_create_shared_link" => {
                let path = required_str(args, "path")?;
                let settings = link_settings(args.get("settings"))?;
                let url = self
                    .authorized_client()
                    .await?
                    .create_shared_link(path, &settings)
                    .await?;
                Ok(json!({ "url": url, "path": path }))
            }
            "dropbox_list_shared_links" => {
                let links = self
                    .authorized_client()
                    .await?
                    .list_shared_links(opt_str(args, "path"))
                    .await?;
                Ok(Value::Array(
                    links.iter().map(|l| Value::Object(l.to_entry())).collect(),
                ))
            }
            "dropbox_revoke_shared_link" => {
                let url = required_str(args, "url")?;
                self.authorized_client()
                    .await?
                    .revoke_shared_link(url)
                    .await?;
                Ok(json!({
                    "status": "success",
                    "message": "Shared link revoked successfully",
                }))
            }
            "dropbox_get_revisions" => {
                let path = required_str(args, "path")?;
                let revisions = self.authorized_client().await?.list_revisions(path).await?;
                Ok(Value::Array(
                    revisions
                        .iter()
                        .map(|r| {
                            let s = r.summary();
                            json!({ "rev": s["rev"], "size": s["size"], "modified": s["modified"] })
                        })
                        .collect(),
                ))
            }
            "dropbox_restore_file" => {
                let (Some(path), Some(rev)) = (opt_str(args, "path"), opt_str(args, "rev")) else {
                    return Err(ConnectorError::InvalidParams(
                        "path and rev parameters are required".to_string(),
                    ));
                };
                let meta = self.authorized_client().await?.restore(path, rev).await?;
                Ok(Value::Object(meta.summary()))
            }
            other => Err(ConnectorError::ToolNotFound(other.to_string())),
        }
    }
}

fn opt_str<'a>(args: &'a JsonObject, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

fn required_str<'a>(args: &'a JsonObject, key: &str) -> Result<&'a str, ConnectorError> {
    opt_str(args, key)
        .ok_or_else(|| ConnectorError::InvalidParams(format!("{} parameter is required", key)))
}

/// Printable UTF-8 is returned as-is; anything with NULs or control bytes
/// other than tab/newline/carriage return is base64.
pub fn is_text_content(data: &[u8]) -> bool {
    if std::str::from_utf8(data).is_err() {
        return false;
    }
    data.iter()
        .all(|&b| b >= 32 || b == b'\t' || b == b'\n' || b == b'\r')
}

fn download_payload(data: Vec<u8>) -> Value {
    if is_text_content(&data) {
        let text = String::from_utf8_lossy(&data).into_owned();
        json!({ "content": text, "type": "text" })
    } else {
        json!({
            "content": base64::engine::general_purpose::STANDARD.encode(&data),
            "type": "base64",
        })
    }
}

fn decode_content(content: &str, encoding: Option<&str>) -> Result<Vec<u8>, ConnectorError> {
    match encoding.unwrap_or("text") {
        "text" => Ok(content.as_bytes().to_vec()),
        "base64" => base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| ConnectorError::InvalidParams(format!("content is not valid base64: {}", e))),
        other => Err(ConnectorError::InvalidParams(format!(
            "encoding must be 'text' or 'base64', got '{}'",
            other
        ))),
    }
}

fn link_settings(raw: Option<&Value>) -> Result<SharedLinkSettings, ConnectorError> {
    let mut settings = SharedLinkSettings::default();
    let Some(obj) = raw.and_then(|v| v.as_object()) else {
        return Ok(settings);
    };
    if let Some(expires) = obj.get("expires").and_then(|v| v.as_str()) {
        let t = DateTime::parse_from_rfc3339(expires).map_err(|e| {
            ConnectorError::InvalidParams(format!("settings.expires must be RFC3339: {}", e))
        })?;
        settings.expires = Some(
            t.with_timezone(&Utc)
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string(),
        );
    }
    if let Some(password) = obj
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        settings.require_password = Some(true);
        settings.link_password = Some(password.to_string());
    }
    Ok(settings)
}

fn schema(v: Value) -> Arc<JsonObject> {
    match v {
        Value::Object(m) => Arc::new(m),
        _ => Arc::new(JsonObject::new()),
    }
}

fn tool(name: &'static str, description: &'static str, input: Value) -> Tool {
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema: schema(input),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

fn path_only(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { "path": { "type": "string", "description": description } },
        "required": ["path"]
    })
}

fn relocation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "from_path": { "type": "string", "description": "Source path" },
            "to_path": { "type": "string", "description": "Destination path" }
        },
        "required": ["from_path", "to_path"]
    })
}

pub fn tool_definitions() -> Vec<Tool> {
    vec![
        tool(
            "dropbox_auth",
            "Authenticate with Dropbox using OAuth 2.0",
            json!({
                "type": "object",
                "properties": {
                    "client_id": {
                        "type": "string",
                        "description": "Dropbox App Client ID (optional if DROPBOX_CLIENT_ID env var is set)"
                    },
                    "client_secret": {
                        "type": "string",
                        "description": "Dropbox App Client Secret (optional if DROPBOX_CLIENT_SECRET env var is set)"
                    }
                }
            }),
        ),
        tool(
            "dropbox_check_auth",
            "Check current authentication status",
            json!({ "type": "object", "properties": {} }),
        ),
        tool(
            "dropbox_list",
            "List files and folders in a Dropbox directory",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to list (empty string for root)", "default": "" }
                }
            }),
        ),
        tool(
            "dropbox_search",
            "Search for files and folders in Dropbox",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "path": { "type": "string", "description": "Path to search in (optional)" }
                },
                "required": ["query"]
            }),
        ),
        tool(
            "dropbox_get_metadata",
            "Get metadata for a file or folder",
            path_only("Path to the file or folder"),
        ),
        tool(
            "dropbox_download",
            "Download a file from Dropbox",
            path_only("Path to the file to download"),
        ),
        tool(
            "dropbox_upload",
            "Upload a file to Dropbox",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path where the file will be uploaded" },
                    "content": { "type": "string", "description": "File content, as text or base64 per 'encoding'" },
                    "mode": {
                        "type": "string",
                        "description": "Upload mode: 'add' or 'overwrite'",
                        "default": "add",
                        "enum": ["add", "overwrite"]
                    },
                    "encoding": {
                        "type": "string",
                        "description": "How 'content' is encoded",
                        "default": "text",
                        "enum": ["text", "base64"]
                    }
                },
                "required": ["path", "content"]
            }),
        ),
        tool(
            "dropbox_create_folder",
            "Create a new folder in Dropbox",
            path_only("Path of the folder to create"),
        ),
        tool(
            "dropbox_move",
            "Move or rename a file or folder",
            relocation_schema(),
        ),
        tool("dropbox_copy", "Copy a file or folder", relocation_schema()),
        tool(
            "dropbox_delete",
            "Delete a file or folder",
            path_only("Path to delete"),
        ),
        tool(
            "dropbox_create_shared_link",
            "Create a shared link for a file or folder",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to share" },
                    "settings": {
                        "type": "object",
                        "description": "Sharing settings",
                        "properties": {
                            "expires": { "type": "string", "description": "Expiration time (RFC 3339)" },
                            "password": { "type": "string", "description": "Password for the shared link" }
                        }
                    }
                },
                "required": ["path"]
            }),
        ),
        tool(
            "dropbox_list_shared_links",
            "List shared links for a file or folder",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to list shared links for (optional)" }
                }
            }),
        ),
        tool(
            "dropbox_revoke_shared_link",
            "Revoke a shared link",
            json!({
                "type": "object",
                "properties": { "url": { "type": "string", "description": "Shared link URL to revoke" } },
                "required": ["url"]
            }),
        ),
        tool(
            "dropbox_get_revisions",
            "Get version history of a file",
            path_only("Path to the file"),
        ),
        tool(
            "dropbox_restore_file",
            "Restore a file to a specific version",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file" },
                    "rev": { "type": "string", "description": "Revision ID to restore" }
                },
                "required": ["path", "rev"]
            }),
        ),
    ]
}

#[async_trait]
impl Connector for DropboxConnector {
    fn name(&self) -> &'static str {
        "dropbox"
    }

    fn description(&self) -> &'static str {
        "Dropbox files and sharing: browse, search, transfer, share and restore."
    }

    async fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(Default::default()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError> {
        Ok(ListToolsResult {
            tools: tool_definitions(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError> {
        let args = request.arguments.unwrap_or_default();
        info!(tool = %request.name, "tool call");
        let value = self.dispatch(request.name.as_ref(), &args).await?;
        structured_result_with_text(&value)
    }
}
