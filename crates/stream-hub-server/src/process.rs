//! Child process plumbing shared by every backend.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

const STDERR_SNIPPET_BYTES: usize = 512;
const STDERR_SNIPPET_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(300);
const WAIT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// Process names swept with `pkill` after a stop, in case a backend left
/// an orphan behind.
const SWEEP_TARGETS: [&str; 6] = ["mpg123", "sox", "aplay", "cvlc", "vlc", "ffmpeg"];

/// One leg of a playback pipeline.
#[derive(Clone)]
pub(crate) struct ProcHandle {
    name: &'static str,
    child: Arc<Mutex<Child>>,
}

impl ProcHandle {
    /// Spawn with kill-on-drop so nothing outlives the server.
    pub(crate) fn spawn(mut cmd: Command, name: &'static str) -> anyhow::Result<Self> {
        cmd.kill_on_drop(true);
        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {name}"))?;
        tracing::debug!(process = name, pid = ?child.id(), "spawned pipeline process");
        Ok(ProcHandle {
            name,
            child: Arc::new(Mutex::new(child)),
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Non-blocking liveness check.
    pub(crate) fn alive(&self) -> bool {
        let mut child = match self.child.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        matches!(child.try_wait(), Ok(None))
    }

    /// Exit status when the process has finished.
    pub(crate) fn exit_status(&self) -> Option<std::process::ExitStatus> {
        let mut child = self.child.lock().ok()?;
        child.try_wait().ok().flatten()
    }

    /// Request termination; errors mean the process is already gone.
    pub(crate) fn terminate(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.start_kill();
        }
    }

    /// Wait for exit up to `timeout`, polling so the child lock is never
    /// held across an await point.
    pub(crate) async fn wait_with_timeout(&self, timeout: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.exit_status().is_some() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(process = self.name, "process did not exit within timeout");
                return;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    pub(crate) fn take_stdout(&self) -> Option<ChildStdout> {
        self.child.lock().ok()?.stdout.take()
    }

    pub(crate) fn take_stdin(&self) -> Option<ChildStdin> {
        self.child.lock().ok()?.stdin.take()
    }

    pub(crate) fn take_stderr(&self) -> Option<ChildStderr> {
        self.child.lock().ok()?.stderr.take()
    }

    /// Read whatever diagnostics the process wrote to stderr, bounded both
    /// in size and time.
    pub(crate) async fn stderr_snippet(&self) -> String {
        let Some(mut stderr) = self.take_stderr() else {
            return String::new();
        };
        let mut buf = vec![0u8; STDERR_SNIPPET_BYTES];
        match tokio::time::timeout(STDERR_SNIPPET_TIMEOUT, stderr.read(&mut buf)).await {
            Ok(Ok(n)) => String::from_utf8_lossy(&buf[..n]).trim().to_string(),
            _ => String::new(),
        }
    }
}

/// Locate an executable on `$PATH`.
pub(crate) fn find_executable(name: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Kill stray backend processes by name. Best effort; pkill exit codes
/// are ignored since "no process matched" is the common case.
pub(crate) fn sweep_kill() {
    for target in SWEEP_TARGETS {
        let _ = std::process::Command::new("pkill")
            .arg("-x")
            .arg(target)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    tracing::debug!("swept leftover backend processes");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_executable_locates_shell() {
        // /bin/sh exists on every target platform.
        let found = find_executable("sh");
        assert!(found.is_some());
        assert!(found.unwrap().is_file());
    }

    #[test]
    fn find_executable_misses_nonsense() {
        assert!(find_executable("definitely-not-a-real-binary-xyz").is_none());
    }

    #[tokio::test]
    async fn proc_handle_tracks_exit() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 3");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        let proc = ProcHandle::spawn(cmd, "test-sh").unwrap();
        proc.wait_with_timeout(std::time::Duration::from_secs(5)).await;
        let status = proc.exit_status().expect("process should have exited");
        assert_eq!(status.code(), Some(3));
        assert!(!proc.alive());
    }

    #[tokio::test]
    async fn terminate_stops_a_running_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        let proc = ProcHandle::spawn(cmd, "test-sleep").unwrap();
        assert!(proc.alive());
        proc.terminate();
        proc.wait_with_timeout(std::time::Duration::from_secs(5)).await;
        assert!(!proc.alive());
    }

    #[tokio::test]
    async fn stderr_snippet_captures_diagnostics() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'connection refused' >&2");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        let proc = ProcHandle::spawn(cmd, "test-stderr").unwrap();
        proc.wait_with_timeout(std::time::Duration::from_secs(5)).await;
        let snippet = proc.stderr_snippet().await;
        assert_eq!(snippet, "connection refused");
    }
}
