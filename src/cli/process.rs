//! Claude Code process spawning and control.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::{Invocation, SpawnError};

/// A running Claude Code process.
///
/// The child is killed if this value is dropped while it is still running.
#[derive(Debug)]
pub struct ClaudeProcess {
    child: Child,
}

impl ClaudeProcess {
    /// Spawn `binary` for `invocation` with exactly the environment `env`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(
        binary: &Path,
        invocation: &Invocation,
        env: &BTreeMap<OsString, OsString>,
    ) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(binary);
        cmd.args(invocation.build_args())
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(e, binary.to_path_buf()))?;

        Ok(Self { child })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Send the kill signal without waiting for the exit.
    ///
    /// Killing a process that has already exited is not an error.
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Kill signal not delivered");
        }
    }

    /// Kill the process and reap it.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on the killed process fails.
    pub async fn kill(&mut self) -> std::io::Result<ExitStatus> {
        self.start_kill();
        self.child.wait().await
    }
}

/// Read a pipe to the end, replacing invalid UTF-8.
///
/// # Errors
///
/// Returns an error if reading fails.
pub async fn read_to_string<R>(mut reader: R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// How long stderr may stay open after the child has been reaped.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Await a stderr reader spawned with [`read_to_string`].
///
/// Call only after the child is reaped. A grandchild can keep the pipe open,
/// so the reader is abandoned after a short bound and whatever it failed to
/// finish is lost.
pub async fn drain_stderr(mut reader: JoinHandle<std::io::Result<String>>) -> String {
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut reader).await {
        Ok(Ok(Ok(text))) => text,
        Ok(Ok(Err(e))) => {
            tracing::debug!(error = %e, "Reading Claude CLI stderr failed");
            String::new()
        }
        Ok(Err(_)) => String::new(),
        Err(_) => {
            reader.abort();
            String::new()
        }
    }
}
