//! Connection lifecycle: fingerprint, authenticate, connect, dispatch,
//! reconnect. The only component that owns the socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use crate::bus::{ConnectionHandle, Message};
use crate::core::Core;
use crate::dispatcher;
use crate::errors::{EdgeError, Result};
use crate::fingerprint;
use crate::http_client::ApiClient;

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const AUTH_BACKOFF_START: Duration = Duration::from_secs(5);
const AUTH_BACKOFF_CAP: Duration = Duration::from_secs(60);
const MAX_FRAME_SIZE: usize = 5 * 1024 * 1024;

/// Validate the API key before the first connect attempt. Retries
/// indefinitely on a connection-level failure with doubling backoff capped
/// at 60s; returns `Ok(false)` immediately on an explicit "invalid" verdict
/// so the caller can re-prompt.
pub async fn authenticate(api: &ApiClient) -> Result<bool> {
    let mut backoff = AUTH_BACKOFF_START;
    loop {
        match api.validate_api_key().await {
            Ok(valid) => return Ok(valid),
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "api key validation unreachable, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(AUTH_BACKOFF_CAP);
            }
        }
    }
}

/// Run the reconnect loop until a terminal error (authentication/server) or
/// `MAX_RECONNECT_ATTEMPTS` consecutive non-terminal failures.
pub async fn run(core: Arc<Core>, ws_base_url: &str, api_key: &str) -> Result<()> {
    let mut attempt: u32 = 0;

    loop {
        match connect_once(&core, ws_base_url, api_key).await {
            Ok(()) => {
                info!("connection closed cleanly, resetting reconnect counter");
                attempt = 0;
            }
            Err(e @ (EdgeError::Authentication(_) | EdgeError::Server(_))) => {
                error!(error = %e, "terminal error from server, stopping");
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                warn!(error = %e, attempt, "connection failed");
                if attempt >= MAX_RECONNECT_ATTEMPTS {
                    error!("exceeded max reconnect attempts");
                    return Err(e);
                }
            }
        }

        let backoff = Duration::from_secs((4 + attempt as u64).min(20));
        tokio::time::sleep(backoff).await;
    }
}

async fn connect_once(core: &Arc<Core>, ws_base_url: &str, api_key: &str) -> Result<()> {
    let fp = fingerprint::generate();
    let url = format!("{}/ws/v1/edge?fingerprint={}", ws_base_url.trim_end_matches('/'), fp);

    let mut request = url
        .into_client_request()
        .map_err(|e| EdgeError::Server(format!("invalid websocket url: {e}")))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", api_key.parse().map_err(|_| {
            EdgeError::Authentication("api key is not a valid header value".to_string())
        })?);

    let config = WebSocketConfig {
        max_message_size: Some(MAX_FRAME_SIZE),
        max_frame_size: Some(MAX_FRAME_SIZE),
        ..Default::default()
    };

    let (ws_stream, _response) = tokio_tungstenite::connect_async_with_config(request, Some(config), false)
        .await
        .map_err(|e| EdgeError::Server(format!("websocket connect failed: {e}")))?;

    info!("connected");
    let (mut write, mut read) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let conn = ConnectionHandle::new(outbound_tx);
    conn.set_connected(true);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if write.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut fatal: Option<EdgeError> = None;
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if let Err(e) = dispatcher::dispatch(core, &conn, &text).await {
                    fatal = Some(e);
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket read error");
                break;
            }
        }
    }

    conn.set_connected(false);
    writer_task.abort();

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
