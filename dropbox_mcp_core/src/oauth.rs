use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::credential::TokenSet;
use crate::error::ConnectorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl OAuthTokens {
    pub fn into_token_set(self) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token.unwrap_or_default(),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

/// The provider's token endpoint: code exchange and refresh grant.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ConnectorError>;

    async fn refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenSet, ConnectorError>;
}

pub struct HttpTokenEndpoint {
    token_url: String,
    http: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn post_form(&self, body: &[(&str, String)]) -> Result<OAuthTokens, ConnectorError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(body)
            .send()
            .await
            .map_err(ConnectorError::HttpRequest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(ConnectorError::HttpRequest)?;
        let v: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|_| {
            serde_json::json!({ "error": text })
        });
        if !status.is_success() {
            let reason = v
                .get("error_description")
                .and_then(|s| s.as_str())
                .or_else(|| v.get("error").and_then(|s| s.as_str()))
                .map(|s| s.to_string())
                .unwrap_or_else(|| v.to_string());
            return Err(ConnectorError::Authentication(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                reason
            )));
        }
        let access_token = v["access_token"].as_str().unwrap_or_default().to_string();
        if access_token.is_empty() {
            return Err(ConnectorError::Authentication(
                "token endpoint response carried no access_token".to_string(),
            ));
        }
        Ok(OAuthTokens {
            access_token,
            refresh_token: v
                .get("refresh_token")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string()),
            expires_in: v.get("expires_in").and_then(|i| i.as_i64()),
            scope: v
                .get("scope")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string()),
            token_type: v
                .get("token_type")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string()),
        })
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, ConnectorError> {
        debug!("exchanging authorization code");
        let body = [
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("client_id", client_id.to_string()),
            ("client_secret", client_secret.to_string()),
        ];
        let tokens = self.post_form(&body).await.map_err(|e| match e {
            ConnectorError::Authentication(msg) => {
                ConnectorError::Authentication(format!("token exchange failed: {}", msg))
            }
            other => other,
        })?;
        Ok(tokens.into_token_set())
    }

    async fn refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenSet, ConnectorError> {
        let mut body = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", client_id.to_string()),
        ];
        if !client_secret.is_empty() {
            body.push(("client_secret", client_secret.to_string()));
        }
        let tokens = self.post_form(&body).await.map_err(|e| match e {
            ConnectorError::Authentication(msg) => {
                ConnectorError::Authentication(format!("failed to refresh token: {}", msg))
            }
            other => other,
        })?;
        info!("access token refreshed");
        Ok(tokens.into_token_set())
    }
}

/// Refresh grant as a free function over any endpoint.
pub async fn refresh(
    endpoint: &dyn TokenEndpoint,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<TokenSet, ConnectorError> {
    if refresh_token.is_empty() {
        return Err(ConnectorError::Authentication(
            "Missing refresh_token".to_string(),
        ));
    }
    endpoint.refresh(client_id, client_secret, refresh_token).await
}
