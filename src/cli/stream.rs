//! Streaming invocations: live text deltas from `--output-format stream-json`.
//!
//! A background task owns the child process. It reads stdout line by line,
//! decodes each line with [`decode_line`] and forwards [`StreamEvent`]s in
//! arrival order. The stream always ends with exactly one terminal event,
//! [`StreamEvent::Completed`] or [`StreamEvent::Failed`].

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{decode_line, drain_stderr, read_to_string, ClaudeProcess, ProcessError};
use crate::runtime::Slot;

/// Why a streaming invocation was stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// The consumer called [`StreamHandle::kill`] or went away.
    ClientCancelled,
    /// The invocation ran past the configured timeout.
    Timeout,
    /// The process is shutting down and the drain grace period ran out.
    ShutdownDrain,
}

impl KillReason {
    /// Whether a stream stopped for this reason still counts as successful.
    #[must_use]
    pub fn is_intentional(self) -> bool {
        !matches!(self, Self::Timeout)
    }
}

/// One item produced by a streaming invocation.
#[derive(Debug)]
pub enum StreamEvent {
    /// Next fragment of generated text.
    TextDelta(String),
    /// The CLI reported (or changed) its session id.
    ResumeToken(String),
    /// The invocation finished successfully or was intentionally stopped.
    Completed,
    /// The invocation failed; no further events follow.
    Failed(ProcessError),
}

impl StreamEvent {
    /// True for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// One-shot kill flag shared between a handle and its reader task.
#[derive(Debug, Default)]
struct KillSwitch {
    reason: OnceLock<KillReason>,
    token: CancellationToken,
    finished: AtomicBool,
}

impl KillSwitch {
    /// Record `reason` and wake the reader. Only the first trip counts, and
    /// tripping after the child has been reaped does nothing.
    fn trip(&self, reason: KillReason) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    fn reason(&self) -> Option<KillReason> {
        self.reason.get().copied()
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Consumer side of a streaming invocation.
///
/// Implements [`futures_core::Stream`]. Dropping the handle before the
/// terminal event kills the child as a client cancellation.
#[derive(Debug)]
pub struct StreamHandle {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    switch: Arc<KillSwitch>,
}

/// Everything a streaming invocation produced, gathered by
/// [`StreamHandle::collect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutput {
    /// Text deltas in arrival order.
    pub deltas: Vec<String>,
    /// Last session id the CLI reported.
    pub resume_token: Option<String>,
}

impl StreamOutput {
    /// All deltas concatenated.
    #[must_use]
    pub fn text(&self) -> String {
        self.deltas.concat()
    }
}

impl StreamHandle {
    /// Stop the child. Idempotent; a no-op once the child has exited.
    pub fn kill(&self) {
        if self.switch.trip(KillReason::ClientCancelled) {
            tracing::debug!("Streaming invocation cancelled by client");
        }
    }

    /// Reason the invocation was stopped early, if it was.
    #[must_use]
    pub fn kill_reason(&self) -> Option<KillReason> {
        self.switch.reason()
    }

    /// Receive the next event, `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Drain the stream to its terminal event.
    ///
    /// # Errors
    ///
    /// Returns the error carried by a `Failed` event.
    pub async fn collect(mut self) -> Result<StreamOutput, ProcessError> {
        let mut output = StreamOutput::default();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::TextDelta(text) => output.deltas.push(text),
                StreamEvent::ResumeToken(token) => output.resume_token = Some(token),
                StreamEvent::Completed => return Ok(output),
                StreamEvent::Failed(err) => return Err(err),
            }
        }
        // The task always sends a terminal event before exiting.
        Ok(output)
    }
}

impl futures_core::Stream for StreamHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.switch.trip(KillReason::ClientCancelled);
    }
}

/// Start the reader task for an already spawned streaming process.
pub(crate) fn spawn_stream(
    mut process: ClaudeProcess,
    slot: Slot,
    deadline: tokio::time::Instant,
    timeout: Duration,
    terminate: CancellationToken,
) -> Result<StreamHandle, ProcessError> {
    let stdout = process
        .take_stdout()
        .ok_or(ProcessError::MissingPipe("stdout"))?;
    let stderr = process
        .take_stderr()
        .ok_or(ProcessError::MissingPipe("stderr"))?;

    let (tx, events) = mpsc::unbounded_channel();
    let switch = Arc::new(KillSwitch::default());

    let task = StreamTask {
        process,
        slot,
        tx,
        switch: Arc::clone(&switch),
        deadline,
        timeout,
        terminate,
    };
    let stderr = tokio::spawn(read_to_string(stderr));
    tokio::spawn(task.run(stdout, stderr));

    Ok(StreamHandle { events, switch })
}

struct StreamTask {
    process: ClaudeProcess,
    slot: Slot,
    tx: mpsc::UnboundedSender<StreamEvent>,
    switch: Arc<KillSwitch>,
    deadline: tokio::time::Instant,
    timeout: Duration,
    terminate: CancellationToken,
}

impl StreamTask {
    async fn run(mut self, stdout: ChildStdout, stderr: JoinHandle<std::io::Result<String>>) {
        let started = Instant::now();
        let read_error = self.pump(stdout).await;

        let status = if self.switch.reason().is_some() || read_error.is_some() {
            self.process.kill().await
        } else {
            // Output is drained; the timeout no longer applies, a kill still does.
            tokio::select! {
                status = self.process.wait() => status,
                () = self.switch.token.cancelled() => self.process.kill().await,
            }
        };
        self.switch.finish();

        let stderr = drain_stderr(stderr).await;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis(),
            exit_code = ?status.as_ref().ok().and_then(std::process::ExitStatus::code),
            kill_reason = ?self.switch.reason(),
            "Claude CLI stream finished"
        );
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "Claude CLI stderr");
        }

        let terminal = match (self.switch.reason(), read_error, status) {
            (Some(reason), _, _) if reason.is_intentional() => StreamEvent::Completed,
            (Some(_), _, _) => StreamEvent::Failed(ProcessError::timeout(self.timeout, &stderr)),
            (None, Some(err), _) | (None, None, Err(err)) => {
                StreamEvent::Failed(ProcessError::Io(err))
            }
            (None, None, Ok(status)) if status.success() => StreamEvent::Completed,
            (None, None, Ok(status)) => {
                StreamEvent::Failed(ProcessError::execution(status.code(), &stderr))
            }
        };

        // Free the slot before the consumer can observe completion.
        let Self { slot, tx, .. } = self;
        slot.release();
        let _ = tx.send(terminal);
    }

    /// Forward decoded stdout lines until EOF, a read error or a kill.
    async fn pump(&mut self, stdout: ChildStdout) -> Option<std::io::Error> {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        let mut last_token: Option<String> = None;
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                () = self.switch.token.cancelled() => return None,
                () = self.terminate.cancelled() => {
                    self.switch.trip(KillReason::ShutdownDrain);
                    return None;
                }
                () = &mut deadline => {
                    tracing::warn!(timeout_ms = self.timeout.as_millis(), "Claude CLI stream timed out, killing");
                    self.switch.trip(KillReason::Timeout);
                    return None;
                }
                read = reader.read_until(b'\n', &mut line) => match read {
                    Ok(0) => return None,
                    Ok(_) => {
                        let delivered = self.forward(&line, &mut last_token);
                        line.clear();
                        if !delivered {
                            self.switch.trip(KillReason::ClientCancelled);
                            return None;
                        }
                    }
                    Err(e) => return Some(e),
                }
            }
        }
    }

    /// Decode one line and send what it carries. Returns `false` once the
    /// consumer is gone.
    fn forward(&self, line: &[u8], last_token: &mut Option<String>) -> bool {
        let Some(frame) = decode_line(&String::from_utf8_lossy(line)) else {
            return true;
        };

        if let Some(token) = frame.resume_token {
            if last_token.as_deref() != Some(token.as_str()) {
                *last_token = Some(token.clone());
                if self.tx.send(StreamEvent::ResumeToken(token)).is_err() {
                    return false;
                }
            }
        }

        if let Some(text) = frame.text {
            if self.tx.send(StreamEvent::TextDelta(text)).is_err() {
                return false;
            }
        }

        true
    }
}
