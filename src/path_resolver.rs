//! Resolves caller-supplied paths against a primary workspace root plus a
//! list of fallback roots, the way every handler that touches the
//! filesystem needs to.

use std::path::{Path, PathBuf};

use crate::errors::{EdgeError, Result};

/// Roots so dangerous to expose that they may never appear in a workspace
/// list, after trailing-slash normalization.
pub const FORBIDDEN_ROOTS: &[&str] = &["/", "/tmp", "C:\\", "C:/"];

/// Strip trailing separators and collapse backslashes the way the server's
/// forbidden-root check expects, so `"/tmp/"` and `"/tmp"` compare equal.
pub fn normalize_root(path: &str) -> String {
    let collapsed = path.replace('\\', "/");
    let trimmed = collapsed.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn is_forbidden_root(path: &str) -> bool {
    let normalized = normalize_root(path);
    FORBIDDEN_ROOTS
        .iter()
        .any(|f| normalize_root(f) == normalized)
}

/// User home directory if it exists, else the current working directory.
pub fn default_directory() -> PathBuf {
    if let Some(home) = dirs::home_dir()
        && home.exists()
    {
        return home;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// `p` coerced to the default directory when empty, `"."`, or absent.
pub fn path_or_default(p: Option<&str>) -> PathBuf {
    match p {
        None => default_directory(),
        Some(p) if p.is_empty() || p == "." => default_directory(),
        Some(p) => PathBuf::from(p),
    }
}

fn decode_file_uri(input: &str) -> Option<String> {
    let rest = input.strip_prefix("file://")?;
    Some(urlencoding_decode(rest))
}

/// Minimal percent-decoder; `file://` URIs only need ASCII-range decoding.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    } else if input == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home.to_string_lossy().into_owned();
    }
    input.to_string()
}

/// Resolve `input` against `primary_root` and, in order, `fallback_roots`.
///
/// See the path resolver component design for the full algorithm: `file://`
/// decoding and `~` expansion happen first; every supplied root must exist
/// on disk or resolution fails; an input whose leading element matches a
/// root's basename is also tried against that root's parent, so callers can
/// pass `"<root-name>/sub/file"`.
pub fn resolve(input: &str, primary_root: Option<&Path>, fallback_roots: &[PathBuf]) -> Result<PathBuf> {
    let decoded = decode_file_uri(input).unwrap_or_else(|| input.to_string());
    let expanded = expand_tilde(&decoded);
    let candidate = PathBuf::from(&expanded);

    if candidate.is_absolute() {
        return Ok(candidate);
    }

    let mut missing = Vec::new();
    if let Some(root) = primary_root
        && !root.exists()
    {
        missing.push(root.to_path_buf());
    }
    for root in fallback_roots {
        if !root.exists() {
            missing.push(root.clone());
        }
    }
    if !missing.is_empty() {
        return Err(EdgeError::WorkspacePathNotFound { missing });
    }

    let mut roots: Vec<&Path> = Vec::new();
    if let Some(root) = primary_root {
        roots.push(root);
    }
    for root in fallback_roots {
        roots.push(root.as_path());
    }

    for root in &roots {
        let joined = root.join(&expanded);
        if joined.exists() {
            return Ok(joined);
        }
    }

    // Leading element equals a root's basename: try that root's parent.
    let mut components = Path::new(&expanded).components();
    if let Some(first) = components.next() {
        let first_str = first.as_os_str().to_string_lossy();
        for root in &roots {
            if root.file_name().map(|n| n.to_string_lossy()) == Some(first_str.clone())
                && let Some(parent) = root.parent()
            {
                let joined = parent.join(&expanded);
                if joined.exists() {
                    return Ok(joined);
                }
            }
        }
    }

    if let Some(root) = primary_root {
        return Ok(root.join(&expanded));
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn forbidden_roots_match_after_normalization() {
        assert!(is_forbidden_root("/"));
        assert!(is_forbidden_root("/tmp"));
        assert!(is_forbidden_root("/tmp/"));
        assert!(is_forbidden_root("C:\\"));
        assert!(is_forbidden_root("C:/"));
        assert!(!is_forbidden_root("/home/user/project"));
    }

    #[test]
    fn absolute_input_short_circuits() {
        let result = resolve("/etc/hosts", None, &[]).unwrap();
        assert_eq!(result, PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn missing_root_fails_fast() {
        let missing_root = PathBuf::from("/no/such/root/anywhere");
        let err = resolve("file.txt", Some(&missing_root), &[]).unwrap_err();
        match err {
            EdgeError::WorkspacePathNotFound { missing } => assert_eq!(missing, vec![missing_root]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn relative_path_resolves_against_primary_root() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "hi").unwrap();
        let resolved = resolve("file.txt", Some(dir.path()), &[]).unwrap();
        assert_eq!(resolved, dir.path().join("file.txt"));
    }

    #[test]
    fn fallback_root_used_when_primary_misses() {
        let primary = tempdir().unwrap();
        let fallback = tempdir().unwrap();
        std::fs::write(fallback.path().join("only_here.txt"), "hi").unwrap();
        let resolved = resolve(
            "only_here.txt",
            Some(primary.path()),
            &[fallback.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(resolved, fallback.path().join("only_here.txt"));
    }

    #[test]
    fn root_basename_prefix_resolves_against_parent() {
        let root = tempdir().unwrap();
        let root_name = root.path().file_name().unwrap().to_string_lossy().into_owned();
        std::fs::write(root.path().join("sub.txt"), "hi").unwrap();
        let input = format!("{root_name}/sub.txt");
        let resolved = resolve(&input, Some(root.path()), &[]).unwrap();
        assert_eq!(resolved, root.path().join("sub.txt"));
    }

    #[test]
    fn no_match_joins_primary_as_assumed_answer() {
        let primary = tempdir().unwrap();
        let resolved = resolve("does/not/exist.txt", Some(primary.path()), &[]).unwrap();
        assert_eq!(resolved, primary.path().join("does/not/exist.txt"));
    }

    #[test]
    fn idempotent_once_roots_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let once = resolve("a.txt", Some(dir.path()), &[]).unwrap();
        let twice = resolve(once.to_str().unwrap(), Some(dir.path()), &[]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn path_or_default_handles_empty_and_dot() {
        assert_eq!(path_or_default(Some("")), default_directory());
        assert_eq!(path_or_default(Some(".")), default_directory());
        assert_eq!(path_or_default(None), default_directory());
        assert_eq!(path_or_default(Some("/x")), PathBuf::from("/x"));
    }
}
