use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use todoforai_edge::bus::{ConnectionHandle, Message};
use todoforai_edge::core::Core;
use todoforai_edge::dispatcher;
use todoforai_edge::http_client::ApiClient;
use todoforai_edge::tools::{ToolCatalog, ToolInstaller, UrlResolver};

struct NoopResolver;
impl UrlResolver for NoopResolver {
    fn resolve(&self, _name: &str) -> Option<(String, bool)> {
        None
    }
}

fn test_core(api: Arc<ApiClient>) -> Arc<Core> {
    let installer = Arc::new(ToolInstaller::new(ToolCatalog::seeded(), Arc::new(NoopResolver)));
    Core::new(installer, api, None)
}

fn test_conn() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectionHandle::new(tx), rx)
}

/// End-to-end scenario 6: function call — read file.
#[tokio::test]
async fn function_call_read_file_returns_content() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "hi").unwrap();

    let api = Arc::new(ApiClient::new("http://127.0.0.1:1", "key"));
    let core = test_core(api);
    let (conn, mut rx) = test_conn();

    let frame = json!({
        "type": "FUNCTION_CALL_REQUEST_FRONT",
        "payload": {
            "requestId": "R",
            "edgeId": "self",
            "functionName": "read_file",
            "args": { "path": "README.md", "rootPath": dir.path().to_string_lossy() },
        },
    });

    dispatcher::dispatch(&core, &conn, &frame.to_string()).await.unwrap();

    let response = rx.recv().await.unwrap();
    assert_eq!(response.kind, "FUNCTION_CALL_RESULT_FRONT");
    assert_eq!(response.payload["success"], true);
    assert_eq!(response.payload["result"]["content"], "hi");
    assert_eq!(response.payload["result"]["contentType"], "text");
}

/// End-to-end scenario 4: CD adding a new workspace path triggers a patch.
#[tokio::test]
async fn cd_adds_workspace_path_and_syncs_to_server() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/edges/self-edge"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let api = Arc::new(ApiClient::new(server.uri(), "key"));
    let core = test_core(api);
    {
        let mut config = core.config.write().await;
        config.mark_identified("self-edge".into(), None);
        config.set_status(todoforai_edge::config_record::EdgeStatus::Online);
    }

    let dir = tempfile::tempdir().unwrap();
    let (conn, mut rx) = test_conn();

    let frame = json!({
        "type": "edge:cd",
        "payload": { "edgeId": "self-edge", "path": dir.path().to_string_lossy(), "requestId": "R" },
    });
    dispatcher::dispatch(&core, &conn, &frame.to_string()).await.unwrap();

    let response = rx.recv().await.unwrap();
    assert_eq!(response.kind, "edge:cd_response");
    assert_eq!(response.payload["success"], true);
    assert_eq!(response.payload["requestId"], "R");

    // Give the fire-and-forget handler task a moment to hit the mock server.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let config = core.config.read().await;
    assert_eq!(config.workspace_paths.len(), 1);
}

#[tokio::test]
async fn error_frame_mentioning_auth_is_reported_as_authentication_error() {
    let api = Arc::new(ApiClient::new("http://127.0.0.1:1", "key"));
    let core = test_core(api);
    let (conn, _rx) = test_conn();

    let frame = json!({ "type": "ERROR", "payload": { "message": "invalid API key" } });
    let err = dispatcher::dispatch(&core, &conn, &frame.to_string()).await.unwrap_err();
    assert!(matches!(err, todoforai_edge::errors::EdgeError::Authentication(_)));
}

#[tokio::test]
async fn unparseable_frame_is_silently_dropped() {
    let api = Arc::new(ApiClient::new("http://127.0.0.1:1", "key"));
    let core = test_core(api);
    let (conn, _rx) = test_conn();

    let result = dispatcher::dispatch(&core, &conn, "not json at all").await;
    assert!(result.is_ok());
}
