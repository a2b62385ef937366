use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::types::*;
use crate::config::Endpoints;
use crate::error::ConnectorError;
use crate::upload::{needs_session, upload_large, UploadSessionApi};

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const SEARCH_MAX_RESULTS: u32 = 100;
const REVISIONS_LIMIT: u32 = 100;

/// Thin bearer-token client over the Dropbox v2 RPC and content endpoints.
#[derive(Clone)]
pub struct DropboxClient {
    http: reqwest::Client,
    api_base: String,
    content_base: String,
    access_token: String,
}

impl std::fmt::Debug for DropboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxClient")
            .field("api_base", &self.api_base)
            .field("content_base", &self.content_base)
            .finish_non_exhaustive()
    }
}

/// `Dropbox-API-Arg` must be plain ASCII; everything else is `\uXXXX`-escaped.
fn api_arg_header<T: Serialize + ?Sized>(arg: &T) -> Result<HeaderValue, ConnectorError> {
    let raw = serde_json::to_string(arg)?;
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    HeaderValue::from_str(&out)
        .map_err(|e| ConnectorError::Other(format!("invalid {} header: {}", API_ARG_HEADER, e)))
}

async fn api_error(resp: reqwest::Response) -> ConnectorError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    let summary = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| {
            v.get("error_summary")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or(text);
    ConnectorError::Api { status, summary }
}

/// Some routes (append_v2, revoke) answer with an empty body, decoded as `null`.
async fn decode<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, ConnectorError> {
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_str(&text)?)
}

impl DropboxClient {
    /// `http` is the connector's shared client; clones reuse its connection pool.
    pub fn new(
        http: reqwest::Client,
        access_token: impl Into<String>,
        endpoints: &Endpoints,
    ) -> Self {
        Self {
            http,
            api_base: endpoints.api_base.trim_end_matches('/').to_string(),
            content_base: endpoints.content_base.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    async fn rpc<A, R>(&self, route: &str, arg: &A) -> Result<R, ConnectorError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(route, "dropbox rpc");
        let resp = self
            .http
            .post(format!("{}/{}", self.api_base, route))
            .header(AUTHORIZATION, self.bearer())
            .json(arg)
            .send()
            .await?;
        decode(resp).await
    }

    /// Content-endpoint call: argument in the header, raw bytes in the body.
    async fn content_upload<A, R>(
        &self,
        route: &str,
        arg: &A,
        body: Vec<u8>,
    ) -> Result<R, ConnectorError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(route, len = body.len(), "dropbox content upload");
        let resp = self
            .http
            .post(format!("{}/{}", self.content_base, route))
            .header(AUTHORIZATION, self.bearer())
            .header(API_ARG_HEADER, api_arg_header(arg)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn list_folder(&self, path: &str) -> Result<Vec<Metadata>, ConnectorError> {
        let mut page: ListFolderResult = self
            .rpc(
                "files/list_folder",
                &json!({ "path": path, "recursive": false, "include_deleted": false }),
            )
            .await?;
        let mut entries = std::mem::take(&mut page.entries);
        while page.has_more {
            page = self
                .rpc("files/list_folder/continue", &json!({ "cursor": page.cursor }))
                .await?;
            entries.append(&mut page.entries);
        }
        Ok(entries)
    }

    pub async fn search(
        &self,
        query: &str,
        path: Option<&str>,
    ) -> Result<Vec<Metadata>, ConnectorError> {
        let mut options = json!({ "max_results": SEARCH_MAX_RESULTS });
        if let Some(p) = path.filter(|p| !p.is_empty()) {
            options["path"] = json!(p);
        }
        let res: SearchResult = self
            .rpc(
                "files/search_v2",
                &json!({ "query": query, "options": options }),
            )
            .await?;
        Ok(res
            .matches
            .into_iter()
            .filter_map(|m| match m.metadata {
                MetadataV2::Metadata { metadata } => Some(metadata),
                MetadataV2::Other => None,
            })
            .collect())
    }

    pub async fn get_metadata(&self, path: &str) -> Result<Metadata, ConnectorError> {
        self.rpc("files/get_metadata", &json!({ "path": path }))
            .await
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>, ConnectorError> {
        let resp = self
            .http
            .post(format!("{}/files/download", self.content_base))
            .header(AUTHORIZATION, self.bearer())
            .header(API_ARG_HEADER, api_arg_header(&json!({ "path": path }))?)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// Single request at or below the session threshold, session upload above it.
    pub async fn upload(
        &self,
        commit: &CommitInfo,
        data: Vec<u8>,
    ) -> Result<FileMetadata, ConnectorError> {
        if needs_session(data.len() as u64) {
            info!(len = data.len(), "payload above threshold, using upload session");
            return upload_large(self, commit, data.as_slice()).await;
        }
        self.content_upload("files/upload", commit, data).await
    }

    pub async fn create_folder(&self, path: &str) -> Result<FolderMetadata, ConnectorError> {
        let res: CreateFolderResult = self
            .rpc(
                "files/create_folder_v2",
                &json!({ "path": path, "autorename": false }),
            )
            .await?;
        Ok(res.metadata)
    }

    pub async fn move_entry(&self, from: &str, to: &str) -> Result<Metadata, ConnectorError> {
        let res: RelocationResult = self
            .rpc(
                "files/move_v2",
                &json!({
                    "from_path": from,
                    "to_path": to,
                    "autorename": false,
                    "allow_ownership_transfer": false,
                }),
            )
            .await?;
        Ok(res.metadata)
    }

    pub async fn copy_entry(&self, from: &str, to: &str) -> Result<Metadata, ConnectorError> {
        let res: RelocationResult = self
            .rpc(
                "files/copy_v2",
                &json!({ "from_path": from, "to_path": to, "autorename": false }),
            )
            .await?;
        Ok(res.metadata)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ConnectorError> {
        let _: Value = self
            .rpc("files/delete_v2", &json!({ "path": path }))
            .await?;
        Ok(())
    }

    /// Returns the link URL. When the provider reports that a link already
    /// exists, the first existing link for the path is returned instead.
    pub async fn create_shared_link(
        &self,
        path: &str,
        settings: &SharedLinkSettings,
    ) -> Result<String, ConnectorError> {
        let mut arg = json!({ "path": path });
        if !settings.is_empty() {
            arg["settings"] = serde_json::to_value(settings)?;
        }
        match self
            .rpc::<_, SharedLinkMetadata>("sharing/create_shared_link_with_settings", &arg)
            .await
        {
            Ok(link) => Ok(link.url().to_string()),
            Err(ConnectorError::Api { status, summary })
                if summary.starts_with("shared_link_already_exists") =>
            {
                debug!("shared link already exists, reusing");
                let links = self.list_shared_links(Some(path)).await?;
                match links.first() {
                    Some(link) => Ok(link.url().to_string()),
                    None => Err(ConnectorError::Api { status, summary }),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_shared_links(
        &self,
        path: Option<&str>,
    ) -> Result<Vec<SharedLinkMetadata>, ConnectorError> {
        let arg = match path.filter(|p| !p.is_empty()) {
            Some(p) => json!({ "path": p }),
            None => json!({}),
        };
        let res: ListSharedLinksResult = self.rpc("sharing/list_shared_links", &arg).await?;
        Ok(res.links)
    }

    pub async fn revoke_shared_link(&self, url: &str) -> Result<(), ConnectorError> {
        let _: Option<Value> = self
            .rpc("sharing/revoke_shared_link", &json!({ "url": url }))
            .await?;
        Ok(())
    }

    pub async fn list_revisions(&self, path: &str) -> Result<Vec<FileMetadata>, ConnectorError> {
        let res: ListRevisionsResult = self
            .rpc(
                "files/list_revisions",
                &json!({ "path": path, "limit": REVISIONS_LIMIT }),
            )
            .await?;
        Ok(res.entries)
    }

    pub async fn restore(&self, path: &str, rev: &str) -> Result<FileMetadata, ConnectorError> {
        self.rpc("files/restore", &json!({ "path": path, "rev": rev }))
            .await
    }

    /// Round-trips a nonce through `check/user` to prove the token is accepted.
    pub async fn check_user(&self) -> Result<(), ConnectorError> {
        let _: Value = self
            .rpc("check/user", &json!({ "query": "ping" }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UploadSessionApi for DropboxClient {
    async fn start_session(&self) -> Result<String, ConnectorError> {
        let res: UploadSessionStartResult = self
            .content_upload(
                "files/upload_session/start",
                &UploadSessionStartArg { close: false },
                Vec::new(),
            )
            .await?;
        Ok(res.session_id)
    }

    async fn append(
        &self,
        cursor: &UploadSessionCursor,
        chunk: Vec<u8>,
    ) -> Result<(), ConnectorError> {
        let _: Option<Value> = self
            .content_upload(
                "files/upload_session/append_v2",
                &UploadSessionAppendArg {
                    cursor,
                    close: false,
                },
                chunk,
            )
            .await?;
        Ok(())
    }

    async fn finish(
        &self,
        cursor: &UploadSessionCursor,
        commit: &CommitInfo,
    ) -> Result<FileMetadata, ConnectorError> {
        self.content_upload(
            "files/upload_session/finish",
            &UploadSessionFinishArg { cursor, commit },
            Vec::new(),
        )
        .await
    }
}
