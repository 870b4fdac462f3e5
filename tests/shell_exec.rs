use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use todoforai_edge::bus::{ConnectionHandle, Message};
use todoforai_edge::shell::{ExecuteRequest, ShellExecutor};
use todoforai_edge::tools::{ToolCatalog, ToolInstaller, UrlResolver};

struct NoopResolver;
impl UrlResolver for NoopResolver {
    fn resolve(&self, _name: &str) -> Option<(String, bool)> {
        None
    }
}

fn test_executor() -> Arc<ShellExecutor> {
    let installer = Arc::new(ToolInstaller::new(ToolCatalog::seeded(), Arc::new(NoopResolver)));
    ShellExecutor::new(installer)
}

fn test_conn() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectionHandle::new(tx), rx)
}

async fn drain_until_done(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    let mut frames = Vec::new();
    while let Some(msg) = rx.recv().await {
        let is_done = msg.kind == "block:sh_done";
        frames.push(msg);
        if is_done {
            break;
        }
    }
    frames
}

/// End-to-end scenario 1: happy-path shell.
#[tokio::test]
async fn happy_path_shell_emits_start_result_done_in_order() {
    let executor = test_executor();
    let (conn, mut rx) = test_conn();

    executor
        .execute_block(
            conn,
            ExecuteRequest {
                block_id: "B1".into(),
                command: "echo hello".into(),
                timeout_secs: Some(10),
                root_path: Some("/tmp".into()),
            },
        )
        .await;

    let frames = drain_until_done(&mut rx).await;
    let kinds: Vec<&str> = frames.iter().map(|m| m.kind.as_str()).collect();

    assert_eq!(kinds.first(), Some(&"block:sh_msg_start"));
    assert_eq!(kinds.last(), Some(&"block:sh_done"));
    assert!(frames
        .iter()
        .any(|m| m.kind == "block:sh_msg_result" && m.payload["content"].as_str().unwrap_or("").contains("hello")));

    let done = frames.last().unwrap();
    assert_eq!(done.payload["blockId"], Value::String("B1".into()));
    assert_eq!(done.payload["returnCode"], 0);
}

/// End-to-end scenario 2: unknown-tool approval gate, then re-execute.
#[tokio::test]
async fn unknown_tool_triggers_approval_gate_then_installs_on_reexecute() {
    let executor = test_executor();
    let (conn, mut rx) = test_conn();

    executor
        .execute_block(
            conn.clone(),
            ExecuteRequest {
                block_id: "B2".into(),
                command: "jq .foo file.json".into(),
                timeout_secs: Some(10),
                root_path: Some("/tmp".into()),
            },
        )
        .await;

    let gate = rx.recv().await.unwrap();
    assert_eq!(gate.kind, "BLOCK_UPDATE");
    assert_eq!(gate.payload["status"], "AWAITING_APPROVAL");
    assert_eq!(gate.payload["approvalContext"]["toolInstalls"], serde_json::json!(["jq"]));

    // No start/result/done should have been emitted before approval.
    assert!(rx.try_recv().is_err());
}

/// End-to-end scenario 3: interrupt via block:signal.
#[tokio::test]
async fn interrupt_terminates_block_with_nonzero_code() {
    let executor = test_executor();
    let (conn, mut rx) = test_conn();

    let exec = executor.clone();
    let handle = tokio::spawn(async move {
        exec.execute_block(
            conn,
            ExecuteRequest {
                block_id: "B3".into(),
                command: "sleep 30".into(),
                timeout_secs: Some(60),
                root_path: Some("/tmp".into()),
            },
        )
        .await;
    });

    // Wait for the start frame before signalling.
    let start = rx.recv().await.unwrap();
    assert_eq!(start.kind, "block:sh_msg_start");

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    executor.signal("B3").await;

    let frames = drain_until_done(&mut rx).await;
    let done = frames.last().unwrap();
    assert_eq!(done.kind, "block:sh_done");
    assert_ne!(done.payload["returnCode"], 0);

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
}
