use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use httptest::{matchers::*, responders::*, Expectation, Server};
use serde_json::json;

use drivelink_common::Error;
use drivelink_storage::onedrive::{
    ConflictBehavior, DriveClient, DriveConfig, DriveRoot, StaticTokenSource, TokenSource,
};

const TOKEN: &str = "test-token";

fn client_for(server: &Server) -> DriveClient {
    let config = DriveConfig {
        api_base: server.url_str("/"),
        ..DriveConfig::default()
    };
    DriveClient::new(config, Arc::new(StaticTokenSource::new(TOKEN))).expect("client")
}

fn conflict_body() -> String {
    json!({
        "error": {
            "code": "nameAlreadyExists",
            "message": "An item with the same name already exists under the parent"
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_app_root_exists() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/special/approot"),
            request::headers(contains(("authorization", "Bearer test-token"))),
        ])
        .respond_with(json_encoded(json!({
            "id": "APPROOT",
            "name": "drivelink",
            "folder": { "childCount": 0 }
        }))),
    );

    let client = client_for(&server);
    assert!(client.app_root_exists().await.unwrap());
}

#[tokio::test]
async fn test_app_root_missing_is_false() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/special/approot"))
            .respond_with(status_code(404)),
    );

    let client = client_for(&server);
    assert!(!client.app_root_exists().await.unwrap());
}

#[tokio::test]
async fn test_app_root_auth_failure_propagates() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/special/approot"))
            .respond_with(status_code(401)),
    );

    let client = client_for(&server);
    assert!(matches!(
        client.app_root_exists().await,
        Err(Error::Authentication(_))
    ));
}

#[tokio::test]
async fn test_get_file_by_path() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/root:/FolderA/TextB.txt"))
            .respond_with(json_encoded(json!({
                "id": "01FILE",
                "name": "TextB.txt",
                "size": 120,
                "file": { "mimeType": "text/plain" },
                "parentReference": { "driveId": "d1", "id": "01A", "path": "/drive/root:/FolderA" }
            }))),
    );

    let client = client_for(&server);
    let file = client
        .get_file(DriveRoot::Drive, "FolderA/TextB.txt")
        .await
        .unwrap();

    assert_eq!(file.info.id, "01FILE");
    assert_eq!(file.size, 120);
    assert_eq!(file.mime_type(), Some("text/plain"));
}

#[tokio::test]
async fn test_get_missing_file_is_not_found() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/special/approot:/nope.txt"))
            .respond_with(status_code(404).body(
                json!({ "error": { "code": "itemNotFound", "message": "The resource could not be found." } })
                    .to_string(),
            )),
    );

    let client = client_for(&server);
    let err = client
        .get_file(DriveRoot::AppRoot, "nope.txt")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_get_file_on_folder_is_type_mismatch() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/root:/Documents"))
            .respond_with(json_encoded(json!({
                "id": "01DOCS",
                "name": "Documents",
                "folder": { "childCount": 3 }
            }))),
    );

    let client = client_for(&server);
    assert!(matches!(
        client.get_file(DriveRoot::Drive, "Documents").await,
        Err(Error::TypeMismatch { expected: "file", found: "folder" })
    ));
}

#[tokio::test]
async fn test_upload_then_get_reports_uploaded_size() {
    let content = b"hello world".to_vec();
    let item = json!({
        "id": "01UP",
        "name": "notes.txt",
        "size": content.len(),
        "file": { "mimeType": "text/plain" }
    });

    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("PUT", "/special/approot:/notes.txt:/content"),
            request::headers(contains(("content-type", "application/octet-stream"))),
            request::body("hello world"),
        ])
        .respond_with(json_encoded(item.clone())),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/special/approot:/notes.txt"))
            .respond_with(json_encoded(item)),
    );

    let client = client_for(&server);
    let uploaded = client
        .upload_file(DriveRoot::AppRoot, "notes.txt", content.clone())
        .await
        .unwrap();
    let fetched = client
        .get_file(DriveRoot::AppRoot, "notes.txt")
        .await
        .unwrap();

    assert_eq!(uploaded.info.id, fetched.info.id);
    assert_eq!(fetched.size, content.len() as u64);
}

#[tokio::test]
async fn test_upload_stream_sends_reader_content() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("PUT", "/root:/backup/data.bin:/content"),
            request::headers(contains(("content-length", "4"))),
            request::body("\u{1}\u{2}\u{3}\u{4}"),
        ])
        .respond_with(json_encoded(json!({ "id": "01BIN", "name": "data.bin", "size": 4 }))),
    );

    let client = client_for(&server);
    let reader = std::io::Cursor::new(vec![1u8, 2, 3, 4]);
    let file = client
        .upload_stream(DriveRoot::Drive, "backup/data.bin", reader, 4)
        .await
        .unwrap();
    assert_eq!(file.size, 4);
}

#[tokio::test]
async fn test_upload_conflict_carries_reason() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("PUT", "/root:/taken:/content"))
            .respond_with(status_code(409).body(conflict_body())),
    );

    let client = client_for(&server);
    match client.upload_file(DriveRoot::Drive, "taken", &b"x"[..]).await {
        Err(Error::Conflict(reason)) => assert!(reason.contains("same name")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_upload_to_root_rejected() {
    let server = Server::run();
    let client = client_for(&server);
    assert!(matches!(
        client.upload_file(DriveRoot::Drive, "/", &b"x"[..]).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_upload_server_error_is_api_error() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("PUT", "/root:/big.iso:/content"))
            .respond_with(status_code(507)),
    );

    let client = client_for(&server);
    match client.upload_file(DriveRoot::Drive, "big.iso", &b"x"[..]).await {
        Err(Error::Api { status, message }) => {
            assert_eq!(status, 507);
            assert_eq!(message, "Insufficient Storage");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_rename_with_quote_sends_valid_json() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("PATCH", "/items/01FILE"),
            request::headers(contains(("content-type", "application/json"))),
            request::body(json_decoded(eq(json!({ "name": "Bob's \"final\" notes.txt" })))),
        ])
        .respond_with(json_encoded(json!({ "id": "01FILE", "name": "Bob's \"final\" notes.txt" }))),
    );

    let client = client_for(&server);
    client
        .rename_file("01FILE", "Bob's \"final\" notes.txt")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rename_conflict_and_failure() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("PATCH", "/items/01A"))
            .respond_with(status_code(409).body(conflict_body())),
    );
    server.expect(
        Expectation::matching(request::method_path("PATCH", "/items/01B"))
            .respond_with(status_code(403)),
    );

    let client = client_for(&server);
    assert!(client.rename_folder("01A", "dup").await.unwrap_err().is_conflict());
    assert!(matches!(
        client.rename_folder("01B", "other").await,
        Err(Error::Api { status: 403, .. })
    ));
}

#[tokio::test]
async fn test_delete_by_id() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("DELETE", "/items/01GONE"))
            .respond_with(status_code(204)),
    );
    server.expect(
        Expectation::matching(request::method_path("DELETE", "/items/01MISSING"))
            .respond_with(status_code(404)),
    );

    let client = client_for(&server);
    client.delete_file("01GONE").await.unwrap();
    assert!(client.delete_file("01MISSING").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_create_folder_fail_twice_conflicts() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", "/special/approot/children"),
            request::body(json_decoded(eq(json!({
                "name": "Reports",
                "folder": {},
                "@microsoft.graph.conflictBehavior": "fail"
            })))),
        ])
        .times(2)
        .respond_with(httptest::cycle![
            status_code(201).body(
                json!({ "id": "01REP", "name": "Reports", "folder": { "childCount": 0 } }).to_string()
            ),
            status_code(409).body(conflict_body()),
        ]),
    );

    let client = client_for(&server);
    let folder = client
        .create_folder(DriveRoot::AppRoot, "Reports", ConflictBehavior::Fail)
        .await
        .unwrap();
    assert_eq!(folder.info.id, "01REP");
    assert_eq!(folder.child_count(), 0);

    let second = client
        .create_folder(DriveRoot::AppRoot, "Reports", ConflictBehavior::Fail)
        .await;
    assert!(second.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_create_nested_folder() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", "/root:/Projects/2024:/children"),
            request::body(json_decoded(eq(json!({
                "name": "Q1",
                "folder": {},
                "@microsoft.graph.conflictBehavior": "rename"
            })))),
        ])
        .respond_with(json_encoded(json!({ "id": "01Q1", "name": "Q1", "folder": {} }))),
    );

    let client = client_for(&server);
    let folder = client
        .create_folder_in(DriveRoot::Drive, "Projects/2024", "Q1", ConflictBehavior::Rename)
        .await
        .unwrap();
    assert_eq!(folder.info.name, "Q1");
}

#[tokio::test]
async fn test_create_then_delete_leaves_listing_unchanged() {
    let listing = json!({
        "value": [
            { "id": "01KEEP", "name": "keep.txt", "size": 1 }
        ]
    });

    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/special/approot/children"))
            .times(2)
            .respond_with(json_encoded(listing)),
    );
    server.expect(
        Expectation::matching(request::method_path("POST", "/special/approot/children"))
            .respond_with(json_encoded(json!({ "id": "01TMP", "name": "tmp", "folder": {} }))),
    );
    server.expect(
        Expectation::matching(request::method_path("DELETE", "/items/01TMP"))
            .respond_with(status_code(204)),
    );

    let client = client_for(&server);
    let before = client.list_children(DriveRoot::AppRoot, "").await.unwrap();

    let folder = client
        .create_folder(DriveRoot::AppRoot, "tmp", ConflictBehavior::Fail)
        .await
        .unwrap();
    client.delete_folder(&folder.info.id).await.unwrap();

    let after = client.list_children(DriveRoot::AppRoot, "").await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_list_children_follows_next_link() {
    let server = Server::run();
    let next = server.url_str("/next-page");
    server.expect(
        Expectation::matching(request::method_path("GET", "/root:/Music:/children"))
            .respond_with(json_encoded(json!({
                "value": [ { "id": "1", "name": "Albums", "folder": { "childCount": 12 } } ],
                "@odata.nextLink": next
            }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/next-page"),
            request::headers(contains(("authorization", "Bearer test-token"))),
        ])
        .respond_with(json_encoded(json!({
            "value": [ { "id": "2", "name": "song.mp3", "size": 4096, "file": { "mimeType": "audio/mpeg" } } ]
        }))),
    );

    let client = client_for(&server);
    let items = client.list_children(DriveRoot::Drive, "Music").await.unwrap();

    assert_eq!(items.len(), 2);
    assert!(items[0].is_folder());
    assert_eq!(items[1].name(), "song.mp3");
}

#[tokio::test]
async fn test_list_children_refuses_foreign_next_link() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/root/children"))
            .respond_with(json_encoded(json!({
                "value": [],
                "@odata.nextLink": "https://collector.invalid/steal"
            }))),
    );

    let client = client_for(&server);
    assert!(matches!(
        client.list_children(DriveRoot::Drive, "/").await,
        Err(Error::Serialization(_))
    ));
}

#[tokio::test]
async fn test_dot_segments_are_rejected_before_sending() {
    // No expectations: any request would fail the test.
    let server = Server::run();
    let client = client_for(&server);

    assert!(matches!(
        client.get_file(DriveRoot::AppRoot, "../../root:/secret.txt").await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        client.upload_file(DriveRoot::AppRoot, "../escape.txt", &b"x"[..]).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        client
            .create_folder(DriveRoot::AppRoot, "..", ConflictBehavior::Fail)
            .await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        client.delete_item("..").await,
        Err(Error::InvalidInput(_))
    ));
}

/// Counts how often the client asks for a token.
struct CountingTokens {
    fetches: AtomicUsize,
}

#[async_trait]
impl TokenSource for CountingTokens {
    async fn access_token(&self) -> drivelink_common::Result<String> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{}", n))
    }
}

#[tokio::test]
async fn test_every_request_fetches_a_token() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/special/approot"),
            request::headers(contains(("authorization", "Bearer token-1"))),
        ])
        .respond_with(json_encoded(json!({ "id": "APPROOT", "name": "app", "folder": {} }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/root:/a.txt"),
            request::headers(contains(("authorization", "Bearer token-2"))),
        ])
        .respond_with(json_encoded(json!({ "id": "01A", "name": "a.txt", "size": 1 }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("DELETE", "/items/01A"),
            request::headers(contains(("authorization", "Bearer token-3"))),
        ])
        .respond_with(status_code(204)),
    );

    let tokens = Arc::new(CountingTokens {
        fetches: AtomicUsize::new(0),
    });
    let config = DriveConfig {
        api_base: server.url_str("/"),
        ..DriveConfig::default()
    };
    let client = DriveClient::new(config, tokens.clone()).expect("client");

    assert!(client.app_root_exists().await.unwrap());
    client.get_file(DriveRoot::Drive, "a.txt").await.unwrap();
    client.delete_file("01A").await.unwrap();

    assert_eq!(tokens.fetches.load(Ordering::SeqCst), 3);
}
