//! Process-singleton table from function name to `(args, connection) ->
//! result`. The dispatch layer's `function-call` handler looks functions up
//! here by name; side-effecting functions receive the connection handle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::bus::ConnectionHandle;
use crate::http_client::ApiClient;
use crate::path_resolver;
use crate::shell::{ExecuteRequest, ShellExecutor};
use crate::tools::installer;

const MAX_TEXT_FILE_BYTES: usize = 100 * 1024;
const MAX_BASE64_FILE_BYTES: usize = 50 * 1024 * 1024;

/// A function may return a normal JSON value, an error, or the magic
/// "awaiting approval" marker that suppresses the response entirely (the
/// server will re-invoke the caller after the user decides).
pub enum FunctionOutcome {
    Value(Value),
    AwaitingApproval,
}

pub type FunctionResult = anyhow::Result<FunctionOutcome>;

#[async_trait]
pub trait RegisteredFunction: Send + Sync {
    async fn call(&self, args: Value, conn: Option<&ConnectionHandle>) -> FunctionResult;
}

pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn RegisteredFunction>>,
}

impl FunctionRegistry {
    pub fn new(shell: Arc<ShellExecutor>, api: Arc<ApiClient>) -> Self {
        let mut functions: HashMap<String, Arc<dyn RegisteredFunction>> = HashMap::new();

        functions.insert("list_functions".into(), Arc::new(ListFunctions));
        functions.insert("get_cwd".into(), Arc::new(GetCwd));
        functions.insert("get_env".into(), Arc::new(GetEnv));
        functions.insert("system_info".into(), Arc::new(SystemInfo));
        functions.insert("get_workspace_tree".into(), Arc::new(WorkspaceTree));
        functions.insert("get_default_path".into(), Arc::new(DefaultPath));
        functions.insert("create_directory".into(), Arc::new(CreateDirectory));
        functions.insert(
            "execute_shell_command".into(),
            Arc::new(ExecuteShellCommand {
                shell: shell.clone(),
            }),
        );
        functions.insert("read_file".into(), Arc::new(ReadFile));
        functions.insert("create_file".into(), Arc::new(CreateFile));
        functions.insert("read_file_base64".into(), Arc::new(ReadFileBase64));
        functions.insert(
            "search_files".into(),
            Arc::new(SearchFiles {
                shell: shell.clone(),
            }),
        );
        functions.insert(
            "download_attachment".into(),
            Arc::new(DownloadAttachment { api: api.clone() }),
        );
        functions.insert("download_chat".into(), Arc::new(DownloadChat { api: api.clone() }));
        functions.insert(
            "register_attachment".into(),
            Arc::new(RegisterAttachment { api: api.clone() }),
        );

        // Backward-compat aliases: dual-cased names point at the same handler.
        let cwd = functions.get("get_cwd").unwrap().clone();
        functions.insert("getCwd".into(), cwd);
        let read = functions.get("read_file").unwrap().clone();
        functions.insert("readFile".into(), read);

        Self { functions }
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub async fn call(&self, name: &str, args: Value, conn: Option<&ConnectionHandle>) -> FunctionResult {
        match self.functions.get(name) {
            Some(f) => f.call(args, conn).await,
            None => anyhow::bail!("unknown function: {name}"),
        }
    }
}

struct ListFunctions;
#[async_trait]
impl RegisteredFunction for ListFunctions {
    async fn call(&self, _args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        Ok(FunctionOutcome::Value(json!([
            "list_functions", "get_cwd", "get_env", "system_info", "get_workspace_tree",
            "get_default_path", "create_directory", "execute_shell_command", "read_file",
            "create_file", "read_file_base64", "search_files", "download_attachment",
            "download_chat", "register_attachment",
        ])))
    }
}

struct GetCwd;
#[async_trait]
impl RegisteredFunction for GetCwd {
    async fn call(&self, _args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let cwd = std::env::current_dir()?;
        Ok(FunctionOutcome::Value(json!({ "cwd": cwd.to_string_lossy() })))
    }
}

struct GetEnv;
#[async_trait]
impl RegisteredFunction for GetEnv {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'name' argument"))?;
        let value = std::env::var(name).ok();
        Ok(FunctionOutcome::Value(json!({ "name": name, "value": value })))
    }
}

struct SystemInfo;
#[async_trait]
impl RegisteredFunction for SystemInfo {
    async fn call(&self, _args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let shell = std::env::var("SHELL")
            .ok()
            .and_then(|s| PathBuf::from(s).file_name().map(|f| f.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "sh".to_string());
        let os_release = std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|contents| {
                contents.lines().find_map(|l| {
                    l.strip_prefix("PRETTY_NAME=").map(|v| v.trim_matches('"').to_string())
                })
            });
        Ok(FunctionOutcome::Value(json!({
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "shell": shell,
            "osRelease": os_release,
        })))
    }
}

struct WorkspaceTree;
#[async_trait]
impl RegisteredFunction for WorkspaceTree {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let root = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let depth = args.get("depth").and_then(Value::as_u64).unwrap_or(4) as usize;
        let root_path = PathBuf::from(root);

        if installer::is_installed("tree") {
            let output = tokio::process::Command::new("tree")
                .arg("-L")
                .arg(depth.to_string())
                .arg(&root_path)
                .env("PATH", installer::augmented_path())
                .output()
                .await?;
            return Ok(FunctionOutcome::Value(json!({
                "tree": String::from_utf8_lossy(&output.stdout),
            })));
        }

        let tree = walk_tree(&root_path, depth);
        Ok(FunctionOutcome::Value(json!({ "tree": tree })))
    }
}

fn walk_tree(root: &std::path::Path, max_depth: usize) -> String {
    let ignores = gitignore_patterns(root);
    let mut out = String::new();
    walk_tree_inner(root, 0, max_depth, &ignores, &mut out);
    out
}

fn gitignore_patterns(root: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(root.join(".gitignore"))
        .map(|contents| {
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn walk_tree_inner(dir: &std::path::Path, depth: usize, max_depth: usize, ignores: &[String], out: &mut String) {
    if depth > max_depth {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut names: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    names.sort();
    for path in names {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if ignores.iter().any(|pat| name == *pat) || name == ".git" {
            continue;
        }
        out.push_str(&"  ".repeat(depth));
        out.push_str(&name);
        if path.is_dir() {
            out.push('/');
            out.push('\n');
            walk_tree_inner(&path, depth + 1, max_depth, ignores, out);
        } else {
            out.push('\n');
        }
    }
}

struct DefaultPath;
#[async_trait]
impl RegisteredFunction for DefaultPath {
    async fn call(&self, _args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        Ok(FunctionOutcome::Value(json!({
            "path": path_resolver::default_directory().to_string_lossy(),
        })))
    }
}

struct CreateDirectory;
#[async_trait]
impl RegisteredFunction for CreateDirectory {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'path' argument"))?;
        std::fs::create_dir_all(path)?;
        Ok(FunctionOutcome::Value(json!({ "path": path })))
    }
}

struct ExecuteShellCommand {
    shell: Arc<ShellExecutor>,
}
#[async_trait]
impl RegisteredFunction for ExecuteShellCommand {
    async fn call(&self, args: Value, conn: Option<&ConnectionHandle>) -> FunctionResult {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'command' argument"))?
            .to_string();
        let block_id = args
            .get("blockId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("fn-{}", uuid_like()));
        let timeout_secs = args.get("timeoutSecs").and_then(Value::as_u64);
        let root_path = args.get("rootPath").and_then(Value::as_str).map(str::to_string);

        match conn {
            Some(conn) => {
                self.shell
                    .execute_block(
                        conn.clone(),
                        ExecuteRequest {
                            block_id: block_id.clone(),
                            command,
                            timeout_secs,
                            root_path,
                        },
                    )
                    .await;
                Ok(FunctionOutcome::AwaitingApproval)
            }
            None => {
                let output = self
                    .shell
                    .wait_for_completion(&block_id, timeout_secs.unwrap_or(120))
                    .await;
                Ok(FunctionOutcome::Value(json!({ "output": output })))
            }
        }
    }
}

fn uuid_like() -> String {
    format!("{:x}", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_nanos())
}

struct ReadFile;
#[async_trait]
impl RegisteredFunction for ReadFile {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let path_arg = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'path' argument"))?;
        let root_path = args.get("rootPath").and_then(Value::as_str).map(PathBuf::from);
        let resolved = path_resolver::resolve(path_arg, root_path.as_deref(), &[])?;

        let metadata = std::fs::metadata(&resolved)?;
        if metadata.is_dir() {
            let mut names: Vec<String> = std::fs::read_dir(&resolved)?
                .flatten()
                .map(|e| {
                    let is_dir = e.path().is_dir();
                    let name = e.file_name().to_string_lossy().into_owned();
                    if is_dir { format!("{name}/") } else { name }
                })
                .collect();
            names.sort();
            return Ok(FunctionOutcome::Value(json!({
                "content": names.join("\n"),
                "fullPath": resolved.to_string_lossy(),
                "contentType": "directory",
            })));
        }

        if metadata.len() as usize > MAX_TEXT_FILE_BYTES {
            anyhow::bail!(
                "file {} is {} bytes, exceeding the {MAX_TEXT_FILE_BYTES} byte limit",
                resolved.display(),
                metadata.len()
            );
        }
        let content = std::fs::read_to_string(&resolved)?;
        Ok(FunctionOutcome::Value(json!({
            "content": content,
            "fullPath": resolved.to_string_lossy(),
            "contentType": "text",
        })))
    }
}

struct CreateFile;
#[async_trait]
impl RegisteredFunction for CreateFile {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let path_arg = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'path' argument"))?;
        let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
        let path = PathBuf::from(path_arg);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(FunctionOutcome::Value(json!({ "path": path_arg })))
    }
}

struct ReadFileBase64;
#[async_trait]
impl RegisteredFunction for ReadFileBase64 {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let path_arg = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'path' argument"))?;
        let path = PathBuf::from(path_arg);
        let metadata = std::fs::metadata(&path)?;
        if metadata.len() as usize > MAX_BASE64_FILE_BYTES {
            anyhow::bail!(
                "file {} is {} bytes, exceeding the {MAX_BASE64_FILE_BYTES} byte base64 limit",
                path.display(),
                metadata.len()
            );
        }
        let bytes = std::fs::read(&path)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(FunctionOutcome::Value(json!({ "content": encoded, "fullPath": path_arg })))
    }
}

struct SearchFiles {
    shell: Arc<ShellExecutor>,
}
#[async_trait]
impl RegisteredFunction for SearchFiles {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let pattern = args
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'pattern' argument"))?;
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");

        if !installer::is_installed("rg") {
            self.shell.installer_ensure_rg().await;
        }

        let output = tokio::process::Command::new("rg")
            .arg(pattern)
            .arg(path)
            .env("PATH", installer::augmented_path())
            .output()
            .await?;
        Ok(FunctionOutcome::Value(json!({
            "matches": String::from_utf8_lossy(&output.stdout),
        })))
    }
}

struct DownloadAttachment {
    api: Arc<ApiClient>,
}
#[async_trait]
impl RegisteredFunction for DownloadAttachment {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let id = args
            .get("attachmentId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'attachmentId' argument"))?;
        let body = self.api.get_file(id).await?;
        Ok(FunctionOutcome::Value(json!({ "content": body })))
    }
}

struct DownloadChat {
    api: Arc<ApiClient>,
}
#[async_trait]
impl RegisteredFunction for DownloadChat {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let id = args
            .get("todoId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'todoId' argument"))?;
        let body = self.api.get_todo(id).await?;
        Ok(FunctionOutcome::Value(json!({ "content": body })))
    }
}

struct RegisterAttachment {
    api: Arc<ApiClient>,
}
#[async_trait]
impl RegisteredFunction for RegisterAttachment {
    async fn call(&self, args: Value, _conn: Option<&ConnectionHandle>) -> FunctionResult {
        let path_arg = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing 'path' argument"))?;
        let bytes = std::fs::read(path_arg)?;
        let result = self.api.register_attachment(path_arg, bytes).await?;
        Ok(FunctionOutcome::Value(result))
    }
}

impl ShellExecutor {
    /// Helper used by `search_files` to install `rg` via the same catalog
    /// the shell executor's approval gate already uses.
    pub async fn installer_ensure_rg(&self) {
        self.installer().ensure_tool("rg").await;
    }
}
