//! Crate-wide error currency. One variant per row of the error handling table.

use std::path::PathBuf;

/// The error type returned by the typed surface of the edge core.
///
/// Ad-hoc/internal call sites (archive extraction, JSON shape probing) use
/// `anyhow::Result` and convert into this type at the boundary, the way the
/// rest of the crate's HTTP and subprocess helpers do.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("failed to parse inbound frame: {0}")]
    Parse(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("workspace path not found: {missing:?}")]
    WorkspacePathNotFound { missing: Vec<PathBuf> },

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("block error: {0}")]
    Block(String),

    #[error("execution timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("failed to install tool {name}: {reason}")]
    InstallFailure { name: String, reason: String },

    #[error("http request failed: {0}")]
    Http(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EdgeError>;
