//! On-disk agent settings: API key, API/WS base URL, debug flag, and the
//! one-shot pending `--add-path`. Distinct from the server-synced
//! [`crate::config_record::ConfigRecord`] — this is local startup state,
//! following the teacher's `config::loader` load/migrate/save shape.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{EdgeError, Result};

fn default_api_url() -> String {
    "https://api.todofor.ai".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub debug: bool,
    /// One-shot: consumed by the first `EDGE_CONFIG_UPDATE` after connect.
    #[serde(skip)]
    pub pending_add_path: Option<String>,
}

impl std::fmt::Debug for RedactedApiKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => write!(f, "Some(\"<redacted>\")"),
            None => write!(f, "None"),
        }
    }
}

struct RedactedApiKey<'a>(&'a Option<String>);

/// Hand-written so a stray `tracing::debug!(?settings)` never prints the key
/// in clear text, the way the derive would.
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &RedactedApiKey(&self.api_key))
            .field("api_url", &self.api_url)
            .field("debug", &self.debug)
            .field("pending_add_path", &self.pending_add_path)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            debug: false,
            pending_add_path: None,
        }
    }
}

/// Read one setting from environment, preferring `TODOFORAI_<NAME>` and
/// falling back to the legacy `TODO4AI_<NAME>` alias.
pub fn env_override(name: &str) -> Option<String> {
    std::env::var(format!("TODOFORAI_{name}"))
        .or_else(|_| std::env::var(format!("TODO4AI_{name}")))
        .ok()
}

fn settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".todoforai").join("config.json"))
}

pub fn load() -> Result<Settings> {
    let Some(path) = settings_path() else {
        return Ok(Settings::default());
    };
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| EdgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| EdgeError::Config(format!("failed to parse {}: {e}", path.display())))
}

pub fn save(settings: &Settings) -> Result<()> {
    let Some(path) = settings_path() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(settings)
        .map_err(|e| EdgeError::Config(format!("failed to serialize settings: {e}")))?;
    std::fs::write(&path, body)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

impl Settings {
    /// Layer CLI flags over environment over the on-disk file, in that
    /// override order (CLI wins).
    pub fn resolve(cli_api_key: Option<String>, cli_api_url: Option<String>, cli_debug: bool) -> Result<Self> {
        let mut settings = load().unwrap_or_default();

        if let Some(key) = env_override("API_KEY") {
            settings.api_key = Some(key);
        }
        if let Some(url) = env_override("API_URL") {
            settings.api_url = url;
        }
        if env_override("DEBUG").is_some() {
            settings.debug = true;
        }

        if let Some(key) = cli_api_key {
            settings.api_key = Some(key);
        }
        if let Some(url) = cli_api_url {
            settings.api_url = url;
        }
        if cli_debug {
            settings.debug = true;
        }

        Ok(settings)
    }

    pub fn ws_url(&self) -> String {
        if let Some(rest) = self.api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.api_url.clone()
        }
    }

    fn debug_redacted(&self) -> String {
        format!(
            "Settings {{ api_key: {:?}, api_url: {:?}, debug: {} }}",
            RedactedApiKey(&self.api_key),
            self.api_url,
            self.debug
        )
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.debug_redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_swaps_scheme() {
        let mut settings = Settings::default();
        settings.api_url = "https://api.todofor.ai".into();
        assert_eq!(settings.ws_url(), "wss://api.todofor.ai");

        settings.api_url = "http://localhost:8080".into();
        assert_eq!(settings.ws_url(), "ws://localhost:8080");
    }

    #[test]
    fn debug_display_redacts_api_key() {
        let mut settings = Settings::default();
        settings.api_key = Some("super-secret".into());
        let rendered = settings.to_string();
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("redacted"));
    }
}
