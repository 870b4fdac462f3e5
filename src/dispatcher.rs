//! Decode inbound frames, route by `type`, run each handler fire-and-forget
//! so a slow or panicking handler never stalls the inbound loop.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::bus::ConnectionHandle;
use crate::core::Core;
use crate::errors::{EdgeError, Result};
use crate::handlers::{self, CallerKind};

/// `Ok(())` for anything that was dispatched or silently dropped;
/// `Err(EdgeError::Authentication | EdgeError::Server)` for a fatal `ERROR`
/// frame, which the connection supervisor treats as a signal to close the
/// socket and stop reconnecting.
pub async fn dispatch(core: &Arc<Core>, conn: &ConnectionHandle, raw: &str) -> Result<()> {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "dropping unparseable frame");
            return Ok(());
        }
    };

    let kind = parsed.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
    let payload = parsed.get("payload").cloned().unwrap_or(Value::Null);

    if kind == "ERROR" {
        let message = payload.as_str().or_else(|| payload.get("message").and_then(Value::as_str)).unwrap_or_default();
        error!(message, "received ERROR frame");
        let lower = message.to_lowercase();
        return if lower.contains("api key") || lower.contains("authentication") {
            Err(EdgeError::Authentication(message.to_string()))
        } else {
            Err(EdgeError::Server(message.to_string()))
        };
    }

    spawn_handler(core.clone(), conn.clone(), kind, payload);
    Ok(())
}

fn spawn_handler(core: Arc<Core>, conn: ConnectionHandle, kind: String, payload: Value) {
    use futures_util::FutureExt;

    tokio::spawn(async move {
        let fut = std::panic::AssertUnwindSafe(run_handler(&core, conn, &kind, &payload));
        if let Err(panic) = fut.catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(kind = %kind, message, "handler panicked");
        }
    });
}

async fn run_handler(core: &Arc<Core>, conn: ConnectionHandle, kind: &str, payload: &Value) {
    match kind {
        "connected_edge" => handlers::connected_edge(core, payload).await,
        "edge:config_update" => handlers::edge_config_update(core, &conn, payload).await,
        "edge:cd" => handlers::edge_cd(core, &conn, payload).await,
        "block:execute" => handlers::block_execute(core, conn, payload).await,
        "block:save" => handlers::block_save(&conn, payload).await,
        "block:keyboard" => handlers::block_keyboard(core, payload).await,
        "block:signal" => handlers::block_signal(core, payload).await,
        "task_action:new" => handlers::task_action_new(&conn, payload).await,
        "ctx:julia_request" => handlers::ctx_julia_request(&conn, payload).await,
        "file:chunk_request" => handlers::file_chunk_request(&conn, payload, "file:chunk_result").await,
        "frontend:file_chunk_request" => {
            handlers::file_chunk_request(&conn, payload, "frontend:file_chunk_result").await
        }
        "edge:get_folders" => handlers::get_folders(&conn, payload).await,
        "FUNCTION_CALL_REQUEST_AGENT" => {
            let agent_id = payload.get("agentId").and_then(Value::as_str).unwrap_or_default().to_string();
            handlers::function_call(core, conn, payload, CallerKind::Agent { agent_id }).await;
        }
        "FUNCTION_CALL_REQUEST_FRONT" => {
            let block_id = payload.get("blockId").and_then(Value::as_str).map(str::to_string);
            handlers::function_call(core, conn, payload, CallerKind::Frontend { block_id }).await;
        }
        other => {
            warn!(kind = other, "unhandled message type");
        }
    }
}
