//! The server-synced config record: workspace paths, feature flags, and
//! connection status. Process-singleton, single-writer (connection
//! supervisor + the CD handler), read freely by every other handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path_resolver::is_forbidden_root;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Online,
    Offline,
    Connecting,
    Error,
}

/// Fields eligible for outbound sync after a local mutation. Anything not
/// in this list is never propagated to the server.
const SYNC_ALLOWLIST: &[&str] = &[
    "workspacepaths",
    "name",
    "isShellEnabled",
    "isFileSystemEnabled",
];

#[derive(Debug, Clone, Default)]
pub struct ConfigRecord {
    pub edge_id: Option<String>,
    pub name: Option<String>,
    pub workspace_paths: Vec<String>,
    pub owner_id: Option<String>,
    pub status: Option<EdgeStatus>,
    pub shell_enabled: bool,
    pub filesystem_enabled: bool,
    identified: bool,
    connected: bool,
}

impl ConfigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: EdgeStatus) {
        self.status = Some(status);
        self.connected = matches!(status, EdgeStatus::Online);
    }

    pub fn mark_identified(&mut self, edge_id: String, owner_id: Option<String>) {
        self.edge_id = Some(edge_id);
        self.owner_id = owner_id;
        self.identified = true;
    }

    fn filter_workspace_paths(paths: Vec<String>) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        paths
            .into_iter()
            .filter(|p| !is_forbidden_root(p))
            .filter(|p| seen.insert(p.clone()))
            .collect()
    }

    /// Add a workspace path if it's not forbidden and not already present.
    /// Returns true if the record actually changed.
    pub fn add_workspace_path(&mut self, path: String) -> bool {
        if is_forbidden_root(&path) || self.workspace_paths.contains(&path) {
            return false;
        }
        self.workspace_paths.push(path);
        true
    }

    /// Apply an inbound `EDGE_CONFIG_UPDATE` payload following the merge
    /// rules: ignore broadcasts for a different edge, filter forbidden
    /// workspace paths, then shallow-merge the remaining fields.
    pub fn apply_update(&mut self, payload: &Value) {
        if let Some(incoming_edge_id) = payload.get("edgeId").and_then(Value::as_str)
            && let Some(own) = &self.edge_id
            && incoming_edge_id != own
        {
            return;
        }

        if let Some(name) = payload.get("name").and_then(Value::as_str) {
            self.name = Some(name.to_string());
        }
        if let Some(paths) = payload.get("workspacepaths").and_then(Value::as_array) {
            let strings: Vec<String> = paths
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            self.workspace_paths = Self::filter_workspace_paths(strings);
        }
        if let Some(flag) = payload.get("isShellEnabled").and_then(Value::as_bool) {
            self.shell_enabled = flag;
        }
        if let Some(flag) = payload.get("isFileSystemEnabled").and_then(Value::as_bool) {
            self.filesystem_enabled = flag;
        }
    }

    pub fn is_ready_to_sync(&self) -> bool {
        self.connected && self.identified
    }

    /// Build the allow-listed delta for an outbound sync given a proposed
    /// full patch; fields outside `SYNC_ALLOWLIST` are dropped.
    pub fn outbound_delta(&self, proposed: &Value) -> Value {
        let mut out = serde_json::Map::new();
        if let Value::Object(map) = proposed {
            for (k, v) in map {
                if SYNC_ALLOWLIST.contains(&k.as_str()) {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_update_ignores_foreign_edge_id() {
        let mut record = ConfigRecord::new();
        record.mark_identified("self-id".into(), None);
        record.apply_update(&json!({"edgeId": "other-id", "name": "nope"}));
        assert_eq!(record.name, None);
    }

    #[test]
    fn apply_update_filters_forbidden_paths() {
        let mut record = ConfigRecord::new();
        record.apply_update(&json!({"workspacepaths": ["/tmp", "/home/u/ok"]}));
        assert_eq!(record.workspace_paths, vec!["/home/u/ok".to_string()]);
    }

    #[test]
    fn add_workspace_path_rejects_duplicates_and_forbidden() {
        let mut record = ConfigRecord::new();
        assert!(record.add_workspace_path("/home/u/proj".into()));
        assert!(!record.add_workspace_path("/home/u/proj".into()));
        assert!(!record.add_workspace_path("/".into()));
        assert_eq!(record.workspace_paths, vec!["/home/u/proj".to_string()]);
    }

    #[test]
    fn outbound_delta_only_keeps_allowlisted_fields() {
        let record = ConfigRecord::new();
        let proposed = json!({
            "workspacepaths": ["/a"],
            "secretField": "leak",
            "isShellEnabled": true,
        });
        let delta = record.outbound_delta(&proposed);
        assert_eq!(delta["workspacepaths"], json!(["/a"]));
        assert_eq!(delta["isShellEnabled"], json!(true));
        assert!(delta.get("secretField").is_none());
    }
}
