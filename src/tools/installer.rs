//! Materializes a tool under the fixed tool directory tree: binary
//! download (optionally archived), or one of two ecosystem package
//! managers. Serializes concurrent installs of the same tool process-wide.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::catalog::{InstallerKind, ToolCatalog, UrlResolver};

const PACKAGE_MANAGER_TIMEOUT: Duration = Duration::from_secs(120);

pub fn tool_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".todoforai")
        .join("tools")
}

pub fn bin_dir() -> PathBuf {
    tool_root().join("bin")
}

pub fn node_bin_dir() -> PathBuf {
    tool_root().join("node_modules").join(".bin")
}

pub fn venv_dir() -> PathBuf {
    tool_root().join("venv")
}

/// `PATH` with the tool directories prepended, in bin/node/venv order, for
/// spawning child processes (both install helpers and executed blocks).
pub fn augmented_path() -> String {
    let existing = std::env::var("PATH").unwrap_or_default();
    let venv_bin = venv_dir().join("bin");
    format!(
        "{}:{}:{}:{}",
        bin_dir().display(),
        node_bin_dir().display(),
        venv_bin.display(),
        existing
    )
}

pub fn is_installed(name: &str) -> bool {
    let path_with_tools = augmented_path();
    which::which_in(name, Some(path_with_tools), std::env::current_dir().unwrap_or_default()).is_ok()
}

/// Process-wide set of tool names currently being installed, guarding
/// `ensure_tool` against duplicate concurrent installs.
#[derive(Clone, Default)]
pub struct InstallMutex {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl InstallMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to become the installer for `name`. Returns `true` if this
    /// caller won the race and should proceed to install; `false` means
    /// someone else is already installing it (or already finished by the
    /// time the caller asked) and this call should short-circuit.
    async fn try_claim(&self, name: &str) -> bool {
        let mut guard = self.in_flight.lock().await;
        guard.insert(name.to_string())
    }

    async fn release(&self, name: &str) {
        self.in_flight.lock().await.remove(name);
    }
}

pub struct ToolInstaller {
    catalog: ToolCatalog,
    resolver: Arc<dyn UrlResolver>,
    in_flight: InstallMutex,
}

impl ToolInstaller {
    pub fn new(catalog: ToolCatalog, resolver: Arc<dyn UrlResolver>) -> Self {
        Self {
            catalog,
            resolver,
            in_flight: InstallMutex::new(),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// `false` if already installed, if another caller already holds the
    /// install for `name`, or if the install itself fails; `true` only on
    /// successful materialization.
    pub async fn ensure_tool(&self, name: &str) -> bool {
        if is_installed(name) {
            return false;
        }
        if !self.in_flight.try_claim(name).await {
            return false;
        }

        let result = self.install(name).await;
        self.in_flight.release(name).await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(tool = name, error = %e, "tool install failed");
                false
            }
        }
    }

    async fn install(&self, name: &str) -> anyhow::Result<()> {
        let Some(entry) = self.catalog.get(name) else {
            anyhow::bail!("tool {name} is not in the catalog");
        };
        match entry.installer_kind {
            InstallerKind::Binary => self.install_binary(name).await,
            InstallerKind::PackageA => self.install_via_package_manager(name, "npm", &["install", "-g", &entry.package_spec]).await,
            InstallerKind::PackageB => self.install_via_package_manager(name, "pip", &["install", &entry.package_spec]).await,
        }
    }

    async fn install_binary(&self, name: &str) -> anyhow::Result<()> {
        let Some((url, is_archive)) = self.resolver.resolve(name) else {
            anyhow::bail!("no download URL for tool {name}");
        };

        std::fs::create_dir_all(bin_dir())?;
        let response = reqwest::get(&url).await?;
        if !response.status().is_success() {
            anyhow::bail!("download of {name} failed: HTTP {}", response.status());
        }
        let bytes = response.bytes().await?;

        let dest = destination_path(name);

        if is_archive {
            let scratch = tempfile::tempdir()?;
            extract_archive(&bytes, &url, scratch.path())?;
            let found = find_matching_binary(scratch.path(), name)
                .ok_or_else(|| anyhow::anyhow!("archive for {name} did not contain a matching binary"))?;
            std::fs::copy(&found, &dest)?;
        } else {
            std::fs::write(&dest, &bytes)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
        }

        info!(tool = name, path = %dest.display(), "installed binary tool");
        Ok(())
    }

    async fn install_via_package_manager(&self, name: &str, manager: &str, args: &[&str]) -> anyhow::Result<()> {
        std::fs::create_dir_all(tool_root())?;
        let mut command = tokio::process::Command::new(manager);
        command.args(args).current_dir(tool_root());
        let output = tokio::time::timeout(PACKAGE_MANAGER_TIMEOUT, command.output()).await??;
        if !output.status.success() {
            anyhow::bail!(
                "{manager} install of {name} exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        info!(tool = name, manager, "installed package-managed tool");
        Ok(())
    }
}

fn destination_path(name: &str) -> PathBuf {
    #[cfg(windows)]
    {
        bin_dir().join(format!("{name}.exe"))
    }
    #[cfg(not(windows))]
    {
        bin_dir().join(name)
    }
}

fn extract_archive(bytes: &[u8], url: &str, dest: &Path) -> anyhow::Result<()> {
    if url.ends_with(".zip") {
        let cursor = std::io::Cursor::new(bytes);
        let mut archive = zip::ZipArchive::new(cursor)?;
        archive.extract(dest)?;
    } else {
        let decoder = flate2::read::GzDecoder::new(bytes);
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(dest)?;
    }
    Ok(())
}

fn find_matching_binary(root: &Path, name: &str) -> Option<PathBuf> {
    let target_exe = format!("{name}.exe");
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let file_name = path.file_name()?.to_string_lossy();
            if file_name == name || file_name == target_exe {
                return Some(path);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeResolver;
    impl UrlResolver for FakeResolver {
        fn resolve(&self, name: &str) -> Option<(String, bool)> {
            Some((format!("https://example.invalid/{name}"), false))
        }
    }

    #[tokio::test]
    async fn ensure_tool_returns_false_for_unknown_name() {
        let catalog = ToolCatalog::new();
        let installer = ToolInstaller::new(catalog, Arc::new(FakeResolver));
        assert!(!installer.ensure_tool("nonexistent").await);
    }

    #[tokio::test]
    async fn concurrent_claims_only_let_one_caller_through() {
        let mutex = InstallMutex::new();
        let first = mutex.try_claim("jq").await;
        let second = mutex.try_claim("jq").await;
        assert!(first);
        assert!(!second);
        mutex.release("jq").await;
        let third = mutex.try_claim("jq").await;
        assert!(third);
    }

    #[test]
    fn augmented_path_prepends_all_three_tool_dirs() {
        let path = augmented_path();
        assert!(path.starts_with(&bin_dir().display().to_string()));
        assert!(path.contains(&node_bin_dir().display().to_string()));
    }

    #[test]
    fn find_matching_binary_locates_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("pkg").join("sub");
        std::fs::create_dir_all(&nested).unwrap();
        let target = nested.join("jq");
        std::fs::write(&target, b"binary").unwrap();
        let found = find_matching_binary(dir.path(), "jq").unwrap();
        assert_eq!(found, target);
    }

    #[test]
    fn destination_path_lands_in_bin_dir() {
        let dest = destination_path("jq");
        assert_eq!(dest.parent().unwrap(), bin_dir());
    }
}
