//! Capability-tagged child-process abstraction: `Pty` or `Pipes`, both
//! exposing the same `write` / `interrupt` / `kill` / output-stream
//! operations so the executor never branches on which mode is live beyond
//! spawn-time selection.

use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child as PtyChild, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::errors::{EdgeError, Result};

const PTY_COLS: u16 = 200;
const PTY_ROWS: u16 = 50;

pub struct SpawnedProcess {
    inner: Inner,
    pub output_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

enum Inner {
    Pty {
        child: Box<dyn PtyChild + Send + Sync>,
        master: Box<dyn MasterPty + Send>,
        writer: Box<dyn Write + Send>,
    },
    Pipes {
        child: tokio::process::Child,
        pid: i32,
    },
}

/// Spawn `program -c command` (via `sh`) in `cwd` with `env`. Tries a PTY
/// first; falls back to pipes with process-group semantics if a PTY can't
/// be allocated or the child can't be spawned inside one.
pub fn spawn(command: &str, cwd: &Path, env: &[(String, String)]) -> Result<SpawnedProcess> {
    match spawn_pty(command, cwd, env) {
        Ok(spawned) => Ok(spawned),
        Err(e) => {
            tracing::debug!(error = %e, "PTY spawn failed, falling back to pipes");
            spawn_pipes(command, cwd, env)
        }
    }
}

fn spawn_pty(command: &str, cwd: &Path, env: &[(String, String)]) -> anyhow::Result<SpawnedProcess> {
    let pty_system = native_pty_system();
    let pair = pty_system.openpty(PtySize {
        rows: PTY_ROWS,
        cols: PTY_COLS,
        pixel_width: 0,
        pixel_height: 0,
    })?;

    let mut cmd = CommandBuilder::new("sh");
    cmd.arg("-c");
    cmd.arg(command);
    cmd.cwd(cwd);
    for (k, v) in env {
        cmd.env(k, v);
    }

    let child = pair.slave.spawn_command(cmd)?;
    drop(pair.slave);

    let mut reader = pair.master.try_clone_reader()?;
    let writer = pair.master.take_writer()?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    Ok(SpawnedProcess {
        inner: Inner::Pty {
            child,
            master: pair.master,
            writer,
        },
        output_rx: rx,
    })
}

fn spawn_pipes(command: &str, cwd: &Path, env: &[(String, String)]) -> Result<SpawnedProcess> {
    let mut builder = tokio::process::Command::new("sh");
    builder
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    for (k, v) in env {
        builder.env(k, v);
    }
    #[cfg(unix)]
    {
        // New process group so the whole tree can be signalled together.
        builder.process_group(0);
    }

    let mut child = builder
        .spawn()
        .map_err(|e| EdgeError::Block(format!("failed to spawn process: {e}")))?;
    let pid = child.id().ok_or_else(|| EdgeError::Block("spawned process has no pid".into()))? as i32;

    let (tx, rx) = mpsc::unbounded_channel();

    if let Some(mut stdout) = child.stdout.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = [0u8; 8192];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    if let Some(mut stderr) = child.stderr.take() {
        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = [0u8; 8192];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    Ok(SpawnedProcess {
        inner: Inner::Pipes { child, pid },
        output_rx: rx,
    })
}

impl SpawnedProcess {
    /// Swap out the output receiver for exclusive use by a reader task,
    /// leaving a closed stand-in behind. Lets the process handle (needed
    /// for write/interrupt/kill) live behind a shared map while the
    /// receiver itself is read from a single dedicated task.
    pub fn take_output_rx(&mut self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (_tx, rx) = mpsc::unbounded_channel();
        std::mem::replace(&mut self.output_rx, rx)
    }

    /// Write to the PTY master or the pipe child's stdin.
    pub async fn write_input(&mut self, data: &[u8]) -> std::io::Result<()> {
        match &mut self.inner {
            Inner::Pty { writer, .. } => writer.write_all(data),
            Inner::Pipes { child, .. } => {
                use tokio::io::AsyncWriteExt;
                if let Some(stdin) = child.stdin.as_mut() {
                    stdin.write_all(data).await
                } else {
                    Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed"))
                }
            }
        }
    }

    fn target_pid(&self) -> Option<i32> {
        match &self.inner {
            Inner::Pty { child, .. } => child.process_id().map(|p| p as i32),
            Inner::Pipes { pid, .. } => Some(*pid),
        }
    }

    fn is_pty(&self) -> bool {
        matches!(self.inner, Inner::Pty { .. })
    }

    /// Best-effort three-stage escalation: SIGINT, then SIGTERM after ~1s,
    /// then SIGKILL after another ~0.5s. Pipes mode signals the negated
    /// pid (the process group) instead of the single pid.
    #[cfg(unix)]
    pub async fn interrupt(&mut self) {
        let Some(pid) = self.target_pid() else {
            self.kill();
            return;
        };
        let target = if self.is_pty() { pid } else { -pid };

        unsafe {
            libc::kill(target, libc::SIGINT);
        }
        tokio::time::sleep(std::time::Duration::from_millis(1000)).await;
        if self.try_wait_nonblocking() {
            return;
        }
        unsafe {
            libc::kill(target, libc::SIGTERM);
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        if self.try_wait_nonblocking() {
            return;
        }
        unsafe {
            libc::kill(target, libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    pub async fn interrupt(&mut self) {
        self.kill();
    }

    fn try_wait_nonblocking(&mut self) -> bool {
        match &mut self.inner {
            Inner::Pty { child, .. } => child.try_wait().ok().flatten().is_some(),
            Inner::Pipes { child, .. } => child.try_wait().ok().flatten().is_some(),
        }
    }

    pub fn kill(&mut self) {
        match &mut self.inner {
            Inner::Pty { child, .. } => {
                let _ = child.kill();
            }
            Inner::Pipes { child, .. } => {
                let _ = child.start_kill();
            }
        }
    }

    /// Waits for exit, returning the exit code (`-1` when unknown).
    pub async fn wait_exit_code(&mut self) -> i32 {
        match &mut self.inner {
            Inner::Pty { child, .. } => {
                loop {
                    match child.try_wait() {
                        Ok(Some(status)) => return status.exit_code() as i32,
                        Ok(None) => tokio::time::sleep(std::time::Duration::from_millis(50)).await,
                        Err(_) => return -1,
                    }
                }
            }
            Inner::Pipes { child, .. } => match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            },
        }
    }
}
