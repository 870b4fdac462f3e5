//! Wire message envelope and the connection handle threaded through every
//! handler, following the teacher's pattern of an explicit handle replacing
//! ad-hoc captured callbacks (see the re-architecture notes).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// Payloads larger than this trigger a warning but are still sent; the
/// protocol itself has no hard cap.
const WARN_PAYLOAD_BYTES: usize = 100 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Message {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// The single-writer queue backing every handler's outbound sends. Cloning
/// this handle is cheap (it's a sender clone); all clones feed the same
/// socket-writer task so frames never interleave.
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Message>,
    connected: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            outbound,
            connected: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    pub fn set_connected(&self, value: bool) {
        self.connected
            .store(value, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Serialize and enqueue `message`. Drops with a warning if
    /// disconnected; warns (but still sends) on oversized payloads.
    pub fn send(&self, message: Message) {
        if !self.is_connected() {
            warn!(kind = %message.kind, "dropping outbound message: not connected");
            return;
        }
        if let Ok(serialized) = serde_json::to_string(&message)
            && serialized.len() > WARN_PAYLOAD_BYTES
        {
            warn!(
                kind = %message.kind,
                bytes = serialized.len(),
                "outbound payload exceeds 100kB"
            );
        }
        if self.outbound.send(message).is_err() {
            warn!("outbound channel closed; message dropped");
        }
    }
}
