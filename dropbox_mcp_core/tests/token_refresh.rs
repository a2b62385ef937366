use std::sync::Arc;

use chrono::{Duration, Utc};
use dropbox_mcp_core::authorize::SystemBrowser;
use dropbox_mcp_core::config::Endpoints;
use dropbox_mcp_core::oauth::{self, HttpTokenEndpoint, TokenEndpoint};
use dropbox_mcp_core::{
    Connector, ConnectorError, Credential, CredentialStore, DropboxConnector,
    FileCredentialStore, ServerConfig,
};
use mockito::Matcher;
use serde_json::json;

fn stored(expires_in: Duration) -> Credential {
    Credential {
        client_id: "abc".into(),
        client_secret: "xyz".into(),
        access_token: "old-access".into(),
        refresh_token: "old-refresh".into(),
        expires_at: Some(Utc::now() + expires_in),
    }
}

#[tokio::test]
async fn refresh_replaces_refresh_token_when_one_is_issued() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/oauth2/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
            Matcher::UrlEncoded("client_id".into(), "abc".into()),
            Matcher::UrlEncoded("client_secret".into(), "xyz".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 14400,
                "token_type": "bearer"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let endpoint = HttpTokenEndpoint::new(format!("{}/oauth2/token", server.url()));
    let tokens = oauth::refresh(&endpoint, "abc", "xyz", "old-refresh")
        .await
        .unwrap();

    let mut cred = stored(Duration::minutes(1));
    cred.update_tokens(tokens);
    assert_eq!(cred.access_token, "new-access");
    assert_eq!(cred.refresh_token, "new-refresh");
    assert!(cred.expires_at.unwrap() > Utc::now() + Duration::hours(3));
    mock.assert_async().await;
}

#[tokio::test]
async fn refresh_keeps_old_refresh_token_when_none_is_issued() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth2/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "access_token": "new-access", "expires_in": 14400 }).to_string())
        .create_async()
        .await;

    let endpoint = HttpTokenEndpoint::new(format!("{}/oauth2/token", server.url()));
    let tokens = endpoint.refresh("abc", "xyz", "old-refresh").await.unwrap();
    assert!(tokens.refresh_token.is_empty());

    let mut cred = stored(Duration::minutes(1));
    cred.update_tokens(tokens);
    assert_eq!(cred.access_token, "new-access");
    assert_eq!(cred.refresh_token, "old-refresh");
}

#[tokio::test]
async fn refresh_failure_is_surfaced() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth2/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "error": "invalid_grant", "error_description": "refresh token is malformed" })
                .to_string(),
        )
        .create_async()
        .await;

    let endpoint = HttpTokenEndpoint::new(format!("{}/oauth2/token", server.url()));
    let err = oauth::refresh(&endpoint, "abc", "xyz", "old-refresh")
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Authentication(_)));
    assert!(err.to_string().contains("failed to refresh token"));
    assert!(err.to_string().contains("refresh token is malformed"));
}

#[tokio::test]
async fn empty_refresh_token_is_rejected_locally() {
    let endpoint = HttpTokenEndpoint::new("http://127.0.0.1:9/unreachable");
    let err = oauth::refresh(&endpoint, "abc", "xyz", "").await.unwrap_err();
    assert!(err.to_string().contains("Missing refresh_token"));
}

#[tokio::test]
async fn expiring_token_is_refreshed_and_saved_before_a_storage_call() {
    let mut server = mockito::Server::new_async().await;
    let token_mock = server
        .mock("POST", "/oauth2/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "access_token": "new-access", "expires_in": 14400 }).to_string())
        .expect(1)
        .create_async()
        .await;
    let list_mock = server
        .mock("POST", "/2/files/list_folder")
        .match_header("authorization", "Bearer new-access")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "entries": [], "cursor": "c1", "has_more": false }).to_string())
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let store = Arc::new(FileCredentialStore::new(&path));
    store.save(&stored(Duration::minutes(2))).unwrap();

    let endpoints = Endpoints {
        authorize_url: format!("{}/oauth2/authorize", server.url()),
        token_url: format!("{}/oauth2/token", server.url()),
        api_base: format!("{}/2", server.url()),
        content_base: format!("{}/2", server.url()),
    };
    let connector = DropboxConnector::new(
        ServerConfig::default()
            .with_credential_path(&path)
            .with_endpoints(endpoints.clone()),
        store.clone(),
        Arc::new(HttpTokenEndpoint::new(endpoints.token_url.clone())),
        Arc::new(SystemBrowser),
    )
    .unwrap();

    let result = connector
        .call_tool(dropbox_mcp_core::CallToolRequestParam {
            name: "dropbox_list".into(),
            arguments: None,
        })
        .await
        .unwrap();
    assert_eq!(result.structured_content.unwrap()["data"], json!([]));

    // The refreshed token and the connector's HTTP client serve later calls too.
    connector
        .call_tool(dropbox_mcp_core::CallToolRequestParam {
            name: "dropbox_list".into(),
            arguments: None,
        })
        .await
        .unwrap();

    let on_disk = store.load().unwrap();
    assert_eq!(on_disk.access_token, "new-access");
    assert_eq!(on_disk.refresh_token, "old-refresh");
    token_mock.assert_async().await;
    list_mock.assert_async().await;
}
