//! Thin per-message-type adapters: unpack `payload`, invoke a core
//! component, format the response frame. Each function owns exactly one
//! wire contract from §4.9 / §6.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::bus::{ConnectionHandle, Message};
use crate::core::Core;
use crate::path_resolver;
use crate::registry::FunctionOutcome;
use crate::shell::ExecuteRequest;

pub async fn connected_edge(core: &Arc<Core>, payload: &Value) {
    let edge_id = payload.get("edgeId").and_then(Value::as_str).map(str::to_string);
    let owner_id = payload.get("ownerId").and_then(Value::as_str).map(str::to_string);
    if let Some(edge_id) = edge_id {
        let mut config = core.config.write().await;
        config.mark_identified(edge_id, owner_id);
    }
}

pub async fn edge_config_update(core: &Arc<Core>, conn: &ConnectionHandle, payload: &Value) {
    {
        let mut config = core.config.write().await;
        config.apply_update(payload);
    }

    let mut pending = core.pending_add_path.write().await;
    let Some(path) = pending.take() else {
        return;
    };

    let added = {
        let mut config = core.config.write().await;
        config.add_workspace_path(path)
    };
    if added {
        sync_workspace_paths(core, conn).await;
    }
}

pub async fn edge_cd(core: &Arc<Core>, conn: &ConnectionHandle, payload: &Value) {
    let request_id = payload.get("requestId").and_then(Value::as_str).unwrap_or_default();
    let Some(path) = payload.get("path").and_then(Value::as_str) else {
        conn.send(Message::new(
            "edge:cd_response",
            json!({ "success": false, "error": "missing 'path'", "requestId": request_id }),
        ));
        return;
    };

    let resolved = match path_resolver::resolve(path, None, &[]) {
        Ok(p) => p,
        Err(e) => {
            conn.send(Message::new(
                "edge:cd_response",
                json!({ "success": false, "error": e.to_string(), "requestId": request_id }),
            ));
            return;
        }
    };
    let absolute = resolved.to_string_lossy().into_owned();

    let added = {
        let mut config = core.config.write().await;
        if path_resolver::is_forbidden_root(&absolute) {
            false
        } else {
            config.add_workspace_path(absolute.clone())
        }
    };

    conn.send(Message::new(
        "edge:cd_response",
        json!({ "success": true, "path": absolute, "requestId": request_id }),
    ));

    if added {
        sync_workspace_paths(core, conn).await;
    }
}

async fn sync_workspace_paths(core: &Arc<Core>, _conn: &ConnectionHandle) {
    let (edge_id, ready, delta) = {
        let config = core.config.read().await;
        let proposed = json!({ "workspacepaths": config.workspace_paths });
        (config.edge_id.clone(), config.is_ready_to_sync(), config.outbound_delta(&proposed))
    };
    let Some(edge_id) = edge_id else { return };
    if !ready {
        return;
    }
    if let Err(e) = core.api.patch_edge(&edge_id, &json!({ "updates": delta })).await {
        warn!(error = %e, "failed to push workspace path sync");
    }
}

pub async fn block_execute(core: &Arc<Core>, conn: ConnectionHandle, payload: &Value) {
    let Some(block_id) = payload.get("blockId").and_then(Value::as_str) else {
        warn!("block:execute missing blockId");
        return;
    };
    let Some(command) = payload.get("content").and_then(Value::as_str) else {
        warn!(block_id, "block:execute missing content");
        return;
    };
    let req = ExecuteRequest {
        block_id: block_id.to_string(),
        command: command.to_string(),
        timeout_secs: payload.get("timeoutSecs").and_then(Value::as_u64),
        root_path: payload.get("rootPath").and_then(Value::as_str).map(str::to_string),
    };
    core.shell.execute_block(conn, req).await;
}

pub async fn block_keyboard(core: &Arc<Core>, payload: &Value) {
    let (Some(block_id), Some(text)) = (
        payload.get("blockId").and_then(Value::as_str),
        payload.get("text").and_then(Value::as_str),
    ) else {
        return;
    };
    core.shell.keyboard_input(block_id, text).await;
}

pub async fn block_signal(core: &Arc<Core>, payload: &Value) {
    if let Some(block_id) = payload.get("blockId").and_then(Value::as_str) {
        core.shell.signal(block_id).await;
    }
}

pub async fn block_save(conn: &ConnectionHandle, payload: &Value) {
    let block_id = payload.get("blockId").and_then(Value::as_str).unwrap_or_default();
    conn.send(Message::new(
        "block:save_result",
        json!({ "blockId": block_id, "success": true }),
    ));
}

pub async fn task_action_new(conn: &ConnectionHandle, payload: &Value) {
    let task_id = payload.get("taskId").and_then(Value::as_str).unwrap_or_default();
    conn.send(Message::new(
        "task_action:update",
        json!({ "taskId": task_id, "status": "started" }),
    ));
}

/// Stub: kept only to preserve protocol compatibility with older callers.
pub async fn ctx_julia_request(conn: &ConnectionHandle, payload: &Value) {
    let request_id = payload.get("requestId").and_then(Value::as_str).unwrap_or_default();
    conn.send(Message::new(
        "ctx:julia_result",
        json!({ "requestId": request_id, "result": Value::Null }),
    ));
}

pub async fn file_chunk_request(conn: &ConnectionHandle, payload: &Value, response_type: &str) {
    let path = payload.get("path").and_then(Value::as_str).unwrap_or_default();
    let root_path = payload.get("rootPath").and_then(Value::as_str).map(std::path::PathBuf::from);

    let mut response = payload.clone();
    match path_resolver::resolve(path, root_path.as_deref(), &[]) {
        Ok(resolved) => match std::fs::read_to_string(&resolved) {
            Ok(content) => {
                response["content"] = json!(content);
                response["contentType"] = json!("text");
                response["success"] = json!(true);
            }
            Err(e) => {
                response["success"] = json!(false);
                response["error"] = json!(e.to_string());
            }
        },
        Err(e) => {
            response["success"] = json!(false);
            response["error"] = json!(e.to_string());
        }
    }
    conn.send(Message::new(response_type, response));
}

pub async fn get_folders(conn: &ConnectionHandle, payload: &Value) {
    let request_id = payload.get("requestId").and_then(Value::as_str).unwrap_or_default();
    let requested = payload.get("path").and_then(Value::as_str).unwrap_or(".");

    let mut candidate = std::path::PathBuf::from(requested);
    while !candidate.as_os_str().is_empty() && !candidate.is_dir() {
        match candidate.parent() {
            Some(parent) => candidate = parent.to_path_buf(),
            None => break,
        }
    }
    if candidate.as_os_str().is_empty() {
        candidate = path_resolver::default_directory();
    }

    let mut folders = Vec::new();
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&candidate) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                folders.push(name);
            } else {
                files.push(name);
            }
        }
    }
    folders.sort();
    files.sort();

    conn.send(Message::new(
        "edge:get_folders_response",
        json!({
            "requestId": request_id,
            "actualPath": candidate.to_string_lossy(),
            "folders": folders,
            "files": files,
        }),
    ));
}

pub enum CallerKind {
    Agent { agent_id: String },
    Frontend { block_id: Option<String> },
}

pub async fn function_call(core: &Arc<Core>, conn: ConnectionHandle, payload: &Value, caller: CallerKind) {
    let request_id = payload.get("requestId").and_then(Value::as_str).unwrap_or_default().to_string();
    let function_name = payload.get("functionName").and_then(Value::as_str).unwrap_or_default();
    let args = payload.get("args").cloned().unwrap_or(Value::Null);

    let result = core.registry.call(function_name, args, Some(&conn)).await;

    let response_type = match &caller {
        CallerKind::Agent { .. } => "FUNCTION_CALL_RESULT_AGENT",
        CallerKind::Frontend { .. } => "FUNCTION_CALL_RESULT_FRONT",
    };

    match result {
        Ok(FunctionOutcome::AwaitingApproval) => {
            debug!(function_name, "function call awaiting approval, suppressing response");
        }
        Ok(FunctionOutcome::Value(value)) => {
            let mut body = json!({ "requestId": request_id, "success": true, "result": value });
            if let CallerKind::Frontend { block_id: Some(block_id) } = &caller {
                body["blockId"] = json!(block_id);
            }
            conn.send(Message::new(response_type, body));
        }
        Err(e) => {
            conn.send(Message::new(
                response_type,
                json!({ "requestId": request_id, "success": false, "error": e.to_string() }),
            ));
        }
    }
}
