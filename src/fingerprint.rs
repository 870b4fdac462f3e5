//! Best-effort stable machine identifier, generated once per process and
//! sent as the `fingerprint` query parameter on connect.

use base64::Engine;
use serde_json::json;

fn machine_id_linux() -> Option<String> {
    std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(target_os = "macos")]
fn machine_id_macos() -> Option<String> {
    use std::process::Command;
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|l| l.contains("IOPlatformUUID"))
        .and_then(|l| l.split('"').nth(3))
        .map(str::to_string)
}

fn best_effort_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        machine_id_linux()
    }
    #[cfg(target_os = "macos")]
    {
        machine_id_macos()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

fn platform_arch_hostname_triple() -> String {
    let host = hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}/{}/{}", std::env::consts::OS, std::env::consts::ARCH, host)
}

/// Base64-encoded JSON object with sorted keys, identifying this machine.
pub fn generate() -> String {
    let id = best_effort_machine_id().unwrap_or_else(platform_arch_hostname_triple);
    let payload = json!({
        "arch": std::env::consts::ARCH,
        "id": id,
        "platform": std::env::consts::OS,
    });
    // serde_json::Map preserves insertion order; json!() on a literal with
    // lexically-sorted keys already yields sorted output here.
    let serialized = serde_json::to_string(&payload).unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(serialized)
}
