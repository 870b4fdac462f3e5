//! The `Core` struct the redesign notes call for: one injected bundle of
//! process-singletons (config record, shell executor, function registry,
//! API client) that handlers borrow from instead of reaching for ad-hoc
//! globals. Tests build a fresh `Core` per case.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config_record::ConfigRecord;
use crate::http_client::ApiClient;
use crate::registry::FunctionRegistry;
use crate::shell::ShellExecutor;
use crate::tools::ToolInstaller;

pub struct Core {
    pub config: RwLock<ConfigRecord>,
    pub shell: Arc<ShellExecutor>,
    pub registry: FunctionRegistry,
    pub api: Arc<ApiClient>,
    /// One-shot `--add-path` argument, consumed after the first
    /// `edge:config_update` following connect.
    pub pending_add_path: RwLock<Option<String>>,
}

impl Core {
    pub fn new(installer: Arc<ToolInstaller>, api: Arc<ApiClient>, pending_add_path: Option<String>) -> Arc<Self> {
        let shell = ShellExecutor::new(installer);
        let registry = FunctionRegistry::new(shell.clone(), api.clone());
        Arc::new(Self {
            config: RwLock::new(ConfigRecord::new()),
            shell,
            registry,
            api,
            pending_add_path: RwLock::new(pending_add_path),
        })
    }
}
