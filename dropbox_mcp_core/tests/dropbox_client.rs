use dropbox_mcp_core::config::Endpoints;
use dropbox_mcp_core::connectors::dropbox::client::DropboxClient;
use dropbox_mcp_core::connectors::dropbox::types::{
    CommitInfo, Metadata, SharedLinkSettings, UploadSessionCursor, WriteMode,
};
use dropbox_mcp_core::upload::UploadSessionApi;
use dropbox_mcp_core::ConnectorError;
use mockito::Matcher;
use serde_json::json;

fn client_for(server: &mockito::ServerGuard) -> DropboxClient {
    let endpoints = Endpoints {
        authorize_url: format!("{}/oauth2/authorize", server.url()),
        token_url: format!("{}/oauth2/token", server.url()),
        api_base: format!("{}/2", server.url()),
        content_base: format!("{}/2", server.url()),
    };
    DropboxClient::new(reqwest::Client::new(), "tok", &endpoints)
}

fn file_json(name: &str) -> serde_json::Value {
    json!({
        ".tag": "file",
        "name": name,
        "id": format!("id:{}", name),
        "path_display": format!("/Docs/{}", name),
        "path_lower": format!("/docs/{}", name.to_lowercase()),
        "size": 42,
        "rev": "0123456789abc",
        "server_modified": "2024-03-01T10:00:00Z",
        "client_modified": "2024-03-01T10:00:00Z",
        "content_hash": "deadbeef"
    })
}

#[tokio::test]
async fn list_folder_follows_cursor() {
    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("POST", "/2/files/list_folder")
        .match_header("authorization", "Bearer tok")
        .match_body(Matcher::PartialJson(json!({ "path": "/Docs" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "entries": [file_json("a.txt"), { ".tag": "folder", "name": "Sub", "id": "id:sub", "path_display": "/Docs/Sub" }],
                "cursor": "cursor-1",
                "has_more": true
            })
            .to_string(),
        )
        .create_async()
        .await;
    let second = server
        .mock("POST", "/2/files/list_folder/continue")
        .match_body(Matcher::Json(json!({ "cursor": "cursor-1" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "entries": [file_json("b.txt")], "cursor": "cursor-2", "has_more": false })
                .to_string(),
        )
        .create_async()
        .await;

    let entries = client_for(&server).list_folder("/Docs").await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, vec!["a.txt", "Sub", "b.txt"]);
    assert!(matches!(entries[1], Metadata::Folder(_)));
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn api_errors_carry_status_and_summary() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/2/files/get_metadata")
        .with_status(409)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "error_summary": "path/not_found/..",
                "error": { ".tag": "path", "path": { ".tag": "not_found" } }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = client_for(&server).get_metadata("/missing").await.unwrap_err();
    match err {
        ConnectorError::Api { status, summary } => {
            assert_eq!(status, 409);
            assert_eq!(summary, "path/not_found/..");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn small_upload_is_a_single_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/2/files/upload")
        .match_header("authorization", "Bearer tok")
        .match_header("content-type", "application/octet-stream")
        .match_header(
            "dropbox-api-arg",
            Matcher::AllOf(vec![
                Matcher::Regex(r#""mode":\{"\.tag":"overwrite"\}"#.to_string()),
                Matcher::Regex(
                    r#""client_modified":"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z""#.to_string(),
                ),
                Matcher::Regex(r#""autorename":true"#.to_string()),
            ]),
        )
        .match_body("hello dropbox")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(file_json("note.txt").to_string())
        .create_async()
        .await;

    let commit = CommitInfo::new("/Docs/note.txt", WriteMode::Overwrite);
    let meta = client_for(&server)
        .upload(&commit, b"hello dropbox".to_vec())
        .await
        .unwrap();
    assert_eq!(meta.name, "note.txt");
    assert_eq!(meta.path(), "/Docs/note.txt");
    mock.assert_async().await;
}

#[tokio::test]
async fn upload_session_routes_carry_cursor_in_header() {
    let mut server = mockito::Server::new_async().await;
    let start = server
        .mock("POST", "/2/files/upload_session/start")
        .match_header("dropbox-api-arg", r#"{"close":false}"#)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "session_id": "sess-9" }).to_string())
        .create_async()
        .await;
    let append = server
        .mock("POST", "/2/files/upload_session/append_v2")
        .match_header(
            "dropbox-api-arg",
            r#"{"cursor":{"session_id":"sess-9","offset":4194304},"close":false}"#,
        )
        .match_body("chunk")
        .with_status(200)
        .with_body("null")
        .create_async()
        .await;
    let finish = server
        .mock("POST", "/2/files/upload_session/finish")
        .match_header(
            "dropbox-api-arg",
            Matcher::Regex(r#"^\{"cursor":\{"session_id":"sess-9","offset":4194309\},"commit":\{"path":"/big.bin""#.to_string()),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(file_json("big.bin").to_string())
        .create_async()
        .await;

    let client = client_for(&server);
    let session_id = client.start_session().await.unwrap();
    assert_eq!(session_id, "sess-9");
    client
        .append(
            &UploadSessionCursor {
                session_id: session_id.clone(),
                offset: 4_194_304,
            },
            b"chunk".to_vec(),
        )
        .await
        .unwrap();
    let meta = client
        .finish(
            &UploadSessionCursor {
                session_id,
                offset: 4_194_309,
            },
            &CommitInfo::new("/big.bin", WriteMode::Add),
        )
        .await
        .unwrap();
    assert_eq!(meta.name, "big.bin");

    start.assert_async().await;
    append.assert_async().await;
    finish.assert_async().await;
}

#[tokio::test]
async fn existing_shared_link_is_reused() {
    let mut server = mockito::Server::new_async().await;
    let create = server
        .mock("POST", "/2/sharing/create_shared_link_with_settings")
        .with_status(409)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "error_summary": "shared_link_already_exists/metadata/..",
                "error": { ".tag": "shared_link_already_exists" }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let list = server
        .mock("POST", "/2/sharing/list_shared_links")
        .match_body(Matcher::Json(json!({ "path": "/Docs/a.txt" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "links": [{
                    ".tag": "file",
                    "url": "https://www.dropbox.com/s/abc/a.txt?dl=0",
                    "name": "a.txt",
                    "path_lower": "/docs/a.txt"
                }],
                "has_more": false
            })
            .to_string(),
        )
        .create_async()
        .await;

    let url = client_for(&server)
        .create_shared_link("/Docs/a.txt", &SharedLinkSettings::default())
        .await
        .unwrap();
    assert_eq!(url, "https://www.dropbox.com/s/abc/a.txt?dl=0");
    create.assert_async().await;
    list.assert_async().await;
}

#[tokio::test]
async fn other_shared_link_errors_are_not_masked() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/2/sharing/create_shared_link_with_settings")
        .with_status(409)
        .with_header("content-type", "application/json")
        .with_body(json!({ "error_summary": "path/not_found/." }).to_string())
        .create_async()
        .await;

    let err = client_for(&server)
        .create_shared_link("/nope", &SharedLinkSettings::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("path/not_found"));
}

#[tokio::test]
async fn download_returns_raw_bytes() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/2/files/download")
        .match_header("dropbox-api-arg", r#"{"path":"/Docs/img.png"}"#)
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body([0x89u8, b'P', b'N', b'G', 0, 1])
        .create_async()
        .await;

    let data = client_for(&server).download("/Docs/img.png").await.unwrap();
    assert_eq!(data, vec![0x89, b'P', b'N', b'G', 0, 1]);
}

#[tokio::test]
async fn revoke_accepts_empty_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/2/sharing/revoke_shared_link")
        .match_body(Matcher::Json(
            json!({ "url": "https://www.dropbox.com/s/abc/a.txt?dl=0" }),
        ))
        .with_status(200)
        .create_async()
        .await;

    client_for(&server)
        .revoke_shared_link("https://www.dropbox.com/s/abc/a.txt?dl=0")
        .await
        .unwrap();
    mock.assert_async().await;
}
