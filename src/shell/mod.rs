//! Per-block subprocess lifecycle: spawn (PTY when available, pipes
//! otherwise), stream output, enforce timeout, handle input injection,
//! interrupt, tool-approval gating, terminal completion frame.

pub mod block;
pub mod process;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::bus::{ConnectionHandle, Message};
use crate::output_buffer::OutputBuffer;
use crate::tools::{installer, scanner, ToolInstaller};

use block::Block;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const COMPLETION_GRACE_SECS: u64 = 5;

pub struct ExecuteRequest {
    pub block_id: String,
    pub command: String,
    pub timeout_secs: Option<u64>,
    pub root_path: Option<String>,
}

pub struct ShellExecutor {
    blocks: Mutex<HashMap<String, Block>>,
    installer: Arc<ToolInstaller>,
}

impl ShellExecutor {
    pub fn new(installer: Arc<ToolInstaller>) -> Arc<Self> {
        Arc::new(Self {
            blocks: Mutex::new(HashMap::new()),
            installer,
        })
    }

    pub fn installer(&self) -> &Arc<ToolInstaller> {
        &self.installer
    }

    /// The full `block:execute` contract: always emits `block:sh_msg_start`
    /// then `block:sh_done`, except on the approval-pending path which
    /// returns having emitted only a `BLOCK_UPDATE`.
    pub async fn execute_block(self: &Arc<Self>, conn: ConnectionHandle, req: ExecuteRequest) {
        let block_id = req.block_id.clone();
        let timeout_secs = req.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);

        let to_install = {
            let mut blocks = self.blocks.lock().await;
            let block = blocks.entry(block_id.clone()).or_insert_with(Block::new);

            if let Some(pending) = block.pending_approval.take() {
                Some(pending)
            } else {
                let missing = scanner::missing_tools(&req.command, self.installer.catalog(), installer::is_installed);
                if missing.is_empty() {
                    None
                } else {
                    block.pending_approval = Some(missing.clone());
                    drop(blocks);
                    conn.send(Message::new(
                        "BLOCK_UPDATE",
                        json!({
                            "blockId": block_id,
                            "status": "AWAITING_APPROVAL",
                            "approvalContext": {
                                "source": "edge",
                                "toolInstalls": missing,
                                "workspacePath": req.root_path,
                            },
                        }),
                    ));
                    return;
                }
            }
        };

        let mut install_announcement = None;
        if let Some(names) = to_install {
            let mut installed = Vec::new();
            for name in &names {
                if self.installer.ensure_tool(name).await {
                    installed.push(name.clone());
                }
            }
            if !installed.is_empty() {
                install_announcement = Some(format!("[installed: {}]\n", installed.join(", ")));
            }
        }

        conn.send(Message::new(
            "block:sh_msg_start",
            json!({ "blockId": block_id }),
        ));

        let cwd = resolve_cwd(req.root_path.as_deref());
        let env = build_env();

        let mut spawned = match process::spawn(&req.command, &cwd, &env) {
            Ok(p) => p,
            Err(e) => {
                self.finish_block(&conn, &block_id, -1, None).await;
                warn!(block_id = %block_id, error = %e, "block spawn failed");
                return;
            }
        };
        let mut output_rx = spawned.take_output_rx();

        {
            let mut blocks = self.blocks.lock().await;
            let block = blocks.entry(block_id.clone()).or_insert_with(Block::new);
            block.process = Some(spawned);
        }

        if let Some(notice) = install_announcement {
            self.stream_chunk(&conn, &block_id, &notice).await;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let exit_code = loop {
            tokio::select! {
                chunk = output_rx.recv() => {
                    match chunk {
                        Some(bytes) => {
                            let text = String::from_utf8_lossy(&bytes).into_owned();
                            self.stream_chunk(&conn, &block_id, &text).await;
                        }
                        None => {
                            let code = self.wait_exit_code(&block_id).await;
                            break code;
                        }
                    }
                }
                _ = &mut sleep => {
                    self.interrupt_block(&block_id).await;
                    self.stream_chunk(&conn, &block_id, &format!("Execution timed out after {timeout_secs} seconds")).await;
                    break -1;
                }
            }
        };

        self.finish_block(&conn, &block_id, exit_code, None).await;
    }

    async fn stream_chunk(&self, conn: &ConnectionHandle, block_id: &str, text: &str) {
        let to_stream = {
            let mut blocks = self.blocks.lock().await;
            blocks
                .get_mut(block_id)
                .map(|b| b.buffer.append(text))
                .unwrap_or_default()
        };
        if !to_stream.is_empty() {
            conn.send(Message::new(
                "block:sh_msg_result",
                json!({ "blockId": block_id, "content": to_stream }),
            ));
        }
    }

    async fn wait_exit_code(&self, block_id: &str) -> i32 {
        let mut blocks = self.blocks.lock().await;
        if let Some(block) = blocks.get_mut(block_id)
            && let Some(process) = block.process.as_mut()
        {
            return process.wait_exit_code().await;
        }
        -1
    }

    async fn interrupt_block(&self, block_id: &str) {
        let mut blocks = self.blocks.lock().await;
        if let Some(block) = blocks.get_mut(block_id)
            && let Some(process) = block.process.as_mut()
        {
            process.interrupt().await;
        }
    }

    async fn finish_block(&self, conn: &ConnectionHandle, block_id: &str, exit_code: i32, extra_notice: Option<String>) {
        let (notice, waiter, output) = {
            let mut blocks = self.blocks.lock().await;
            if let Some(block) = blocks.get_mut(block_id) {
                let mut notice = block.buffer.truncation_notice();
                if let Some(extra) = extra_notice {
                    notice.push_str(&extra);
                }
                let waiter = block.completion_waiter.take();
                let output = block.buffer.get_output();
                block.process = None;
                (notice, waiter, output)
            } else {
                (String::new(), None, String::new())
            }
        };

        if !notice.is_empty() {
            conn.send(Message::new(
                "block:sh_msg_result",
                json!({ "blockId": block_id, "content": notice }),
            ));
        }

        conn.send(Message::new(
            "block:sh_done",
            json!({ "blockId": block_id, "returnCode": exit_code }),
        ));

        if let Some(waiter) = waiter {
            let _ = waiter.send(output);
        }

        info!(block_id = %block_id, exit_code, "block done");
    }

    /// Best-effort three-stage interrupt escalation via `block:signal`.
    pub async fn signal(&self, block_id: &str) {
        self.interrupt_block(block_id).await;
    }

    /// Validate the block exists, checkpoint its buffer, append a newline
    /// if missing, and write to the child. Returns `true` on success.
    pub async fn keyboard_input(&self, block_id: &str, text: &str) -> bool {
        let mut to_write = text.to_string();
        if !to_write.ends_with('\n') {
            to_write.push('\n');
        }

        let mut blocks = self.blocks.lock().await;
        let Some(block) = blocks.get_mut(block_id) else {
            return false;
        };
        block.buffer.reset_for_interaction();
        let Some(process) = block.process.as_mut() else {
            return false;
        };
        process.write_input(to_write.as_bytes()).await.is_ok()
    }

    /// Register a one-shot resolver for the next terminal transition of
    /// `block_id`; resolves within `timeout_secs + 5` regardless of
    /// whether the process has actually finished by then (preserved grace
    /// period, see design notes).
    pub async fn wait_for_completion(&self, block_id: &str, timeout_secs: u64) -> String {
        let rx = {
            let mut blocks = self.blocks.lock().await;
            let block = blocks.entry(block_id.to_string()).or_insert_with(Block::new);
            let (tx, rx) = oneshot::channel();
            block.completion_waiter = Some(tx);
            rx
        };

        let deadline = Duration::from_secs(timeout_secs + COMPLETION_GRACE_SECS);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(output)) => output,
            _ => {
                let mut blocks = self.blocks.lock().await;
                blocks
                    .get(block_id)
                    .map(|b| b.buffer.get_output())
                    .unwrap_or_default()
            }
        }
    }
}

fn resolve_cwd(root_path: Option<&str>) -> PathBuf {
    if let Some(path) = root_path {
        let candidate = PathBuf::from(path);
        if candidate.is_dir() {
            return candidate;
        }
    }
    std::env::temp_dir().join("todoforai-edge")
}

fn build_env() -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars().collect();
    env.push(("NO_COLOR".to_string(), "1".to_string()));
    env.push(("TERM".to_string(), "dumb".to_string()));
    env.push(("PATH".to_string(), installer::augmented_path()));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog::ToolCatalog;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct NoopResolver;
    impl crate::tools::catalog::UrlResolver for NoopResolver {
        fn resolve(&self, _name: &str) -> Option<(String, bool)> {
            None
        }
    }

    fn test_executor() -> Arc<ShellExecutor> {
        let installer = Arc::new(ToolInstaller::new(ToolCatalog::new(), Arc::new(NoopResolver)));
        ShellExecutor::new(installer)
    }

    fn test_conn() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn happy_path_emits_start_result_done() {
        let executor = test_executor();
        let (conn, mut rx) = test_conn();
        executor
            .execute_block(
                conn,
                ExecuteRequest {
                    block_id: "B1".into(),
                    command: "echo hello".into(),
                    timeout_secs: Some(5),
                    root_path: Some("/tmp".into()),
                },
            )
            .await;

        let start = rx.recv().await.unwrap();
        assert_eq!(start.kind, "block:sh_msg_start");

        let mut saw_hello = false;
        let mut done = None;
        while let Some(msg) = rx.recv().await {
            if msg.kind == "block:sh_msg_result" && msg.payload["content"].as_str().unwrap_or("").contains("hello") {
                saw_hello = true;
            }
            if msg.kind == "block:sh_done" {
                done = Some(msg);
                break;
            }
        }
        assert!(saw_hello);
        let done = done.unwrap();
        assert_eq!(done.payload["returnCode"], 0);
    }

    #[tokio::test]
    async fn resolve_cwd_falls_back_to_temp_dir_when_missing() {
        let cwd = resolve_cwd(Some("/definitely/not/a/real/path"));
        assert!(cwd.starts_with(std::env::temp_dir()));
    }

    #[tokio::test]
    async fn keyboard_input_on_unknown_block_returns_false() {
        let executor = test_executor();
        assert!(!executor.keyboard_input("no-such-block", "hi").await);
    }
}
