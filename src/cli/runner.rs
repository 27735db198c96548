//! Gated, time-limited execution of Claude CLI invocations.
//!
//! [`ClaudeRunner::run`] waits for the whole result; [`ClaudeRunner::stream`]
//! returns a [`StreamHandle`] yielding text as the CLI prints it. Both take a
//! slot from the [`ConcurrencyGate`] before spawning and hold it until the
//! child has been reaped.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::stream::{spawn_stream, StreamHandle};
use super::{build_env, drain_stderr, read_to_string, CliResult, ClaudeProcess, Invocation, OutputMode, ProcessError};
use crate::config::ToolConfig;
use crate::runtime::ConcurrencyGate;

/// Result of a unary invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Generated text.
    pub text: String,
    /// CLI session id, when the CLI reported one.
    pub resume_token: Option<String>,
}

/// Launches the Claude CLI on behalf of request handlers.
#[derive(Debug, Clone)]
pub struct ClaudeRunner {
    binary: PathBuf,
    timeout: Duration,
    entrypoint: String,
    gate: ConcurrencyGate,
    terminate: CancellationToken,
}

impl ClaudeRunner {
    /// Create a runner from tool configuration and a shared gate.
    #[must_use]
    pub fn new(config: &ToolConfig, gate: ConcurrencyGate) -> Self {
        Self {
            binary: config.claude_path.clone(),
            timeout: config.timeout(),
            entrypoint: config.entrypoint.clone(),
            gate,
            terminate: CancellationToken::new(),
        }
    }

    /// Use `token` to force-stop streaming invocations at the end of a
    /// shutdown drain.
    #[must_use]
    pub fn with_terminate_token(mut self, token: CancellationToken) -> Self {
        self.terminate = token;
        self
    }

    #[must_use]
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub(crate) fn spawn_process(&self, invocation: &Invocation) -> Result<ClaudeProcess, ProcessError> {
        let env = build_env(std::env::vars_os(), &self.entrypoint);
        let process = ClaudeProcess::spawn(&self.binary, invocation, &env)?;
        tracing::info!(
            binary = %self.binary.display(),
            args = %invocation.display_args(),
            pid = ?process.id(),
            "Spawned Claude CLI"
        );
        Ok(process)
    }

    /// Run `invocation` to completion and return its text.
    ///
    /// In [`OutputMode::Json`] the stdout is parsed as a [`CliResult`]; when it
    /// is not one, the trimmed stdout is returned as plain text.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyLimit` if no slot is free (nothing is spawned)
    /// - `Spawn` if the CLI cannot be started
    /// - `Timeout` if the CLI runs longer than the configured timeout
    /// - `Execution` if the CLI exits unsuccessfully
    pub async fn run(&self, invocation: &Invocation) -> Result<RunOutput, ProcessError> {
        let _slot = self.gate.acquire()?;
        let started = Instant::now();

        let mut process = self.spawn_process(invocation)?;
        let stdout = process
            .take_stdout()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = process
            .take_stderr()
            .ok_or(ProcessError::MissingPipe("stderr"))?;
        // Read outside the timeout so a killed child still reports its stderr.
        let stderr = tokio::spawn(read_to_string(stderr));

        let collect = async {
            let stdout = read_to_string(stdout).await?;
            let status = process.wait().await?;
            Ok::<_, std::io::Error>((stdout, status))
        };
        let outcome = tokio::time::timeout(self.timeout, collect).await;

        let (stdout, status) = match outcome {
            Ok(collected) => collected?,
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis(), "Claude CLI timed out, killing");
                process.kill().await?;
                let stderr = drain_stderr(stderr).await;
                return Err(ProcessError::timeout(self.timeout, &stderr));
            }
        };
        let stderr = drain_stderr(stderr).await;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis(),
            exit_code = ?status.code(),
            "Claude CLI finished"
        );
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "Claude CLI stderr");
        }

        if !status.success() {
            return Err(ProcessError::execution(status.code(), &stderr));
        }

        Ok(interpret_output(invocation.output_mode(), &stdout))
    }

    /// Start `invocation` in streaming mode.
    ///
    /// The slot is taken before anything is spawned, so a refusal is reported
    /// here rather than through the returned stream.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrencyLimit` or `Spawn` if the invocation cannot start.
    pub fn stream(&self, invocation: &Invocation) -> Result<StreamHandle, ProcessError> {
        let slot = self.gate.acquire()?;
        let deadline = tokio::time::Instant::now() + self.timeout;
        let process = self.spawn_process(invocation)?;
        spawn_stream(process, slot, deadline, self.timeout, self.terminate.clone())
    }
}

/// Turn a successful stdout into a [`RunOutput`].
#[must_use]
pub fn interpret_output(mode: OutputMode, stdout: &str) -> RunOutput {
    if mode == OutputMode::Json {
        if let Some(parsed) = CliResult::parse(stdout) {
            let text = parsed
                .result
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| stdout.trim().to_string());
            return RunOutput {
                text,
                resume_token: parsed.session_id,
            };
        }
        tracing::debug!("Claude CLI output is not a JSON result, returning raw text");
    }

    RunOutput {
        text: stdout.trim().to_string(),
        resume_token: None,
    }
}
