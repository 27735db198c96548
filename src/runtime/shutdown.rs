//! Graceful shutdown: stop accepting, let in-flight invocations drain, exit.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ConcurrencyGate;
use crate::config::ShutdownConfig;

/// Lifecycle of the whole process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownPhase {
    #[default]
    Running,
    /// A signal arrived; no new connections, in-flight work may finish.
    Draining,
    /// Draining is over and the process should exit.
    Terminated,
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every invocation finished within the grace period.
    Drained,
    /// The grace period ran out with invocations still running.
    Forced { outstanding: usize },
}

/// Drives the `Running -> Draining -> Terminated` transition.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    phase: watch::Sender<ShutdownPhase>,
    stop_accepting: CancellationToken,
    terminate: CancellationToken,
    gate: ConcurrencyGate,
    grace: Duration,
    poll_interval: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator watching `gate`.
    #[must_use]
    pub fn new(gate: ConcurrencyGate, config: &ShutdownConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            phase,
            stop_accepting: CancellationToken::new(),
            terminate: CancellationToken::new(),
            gate,
            grace: config.grace(),
            poll_interval: config.poll_interval().max(Duration::from_millis(1)),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Cancelled when draining starts; the HTTP listener stops on it.
    #[must_use]
    pub fn accept_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    /// Cancelled when the grace period expires with work outstanding.
    #[must_use]
    pub fn terminate_token(&self) -> CancellationToken {
        self.terminate.clone()
    }

    /// Enter `Draining`. Returns `false` if shutdown had already begun.
    pub fn begin_drain(&self) -> bool {
        let started = self.phase.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Draining;
                true
            } else {
                false
            }
        });

        if started {
            tracing::info!(
                active = self.gate.active_count(),
                grace_ms = self.grace.as_millis(),
                "Shutdown requested, draining in-flight invocations"
            );
            self.stop_accepting.cancel();
        } else {
            tracing::debug!("Shutdown already in progress, ignoring signal");
        }
        started
    }

    /// Wait until the gate is empty or the grace period ends, then enter
    /// `Terminated`.
    ///
    /// A forced exit is logged and reported, not treated as an error.
    pub async fn drain(&self) -> DrainOutcome {
        let deadline = Instant::now() + self.grace;
        let mut ticker = tokio::time::interval(self.poll_interval);

        let outcome = loop {
            ticker.tick().await;
            let active = self.gate.active_count();
            if active == 0 {
                break DrainOutcome::Drained;
            }
            if Instant::now() >= deadline {
                break DrainOutcome::Forced {
                    outstanding: active,
                };
            }
            tracing::debug!(active, "Waiting for in-flight invocations");
        };

        match outcome {
            DrainOutcome::Drained => tracing::info!("All invocations finished"),
            DrainOutcome::Forced { outstanding } => {
                tracing::warn!(outstanding, "Grace period elapsed, forcing exit");
                self.terminate.cancel();
            }
        }

        self.phase.send_replace(ShutdownPhase::Terminated);
        outcome
    }

    /// Wait for a termination signal, then drain.
    pub async fn run_until_signal(&self) -> DrainOutcome {
        wait_for_signal().await;
        self.begin_drain();
        self.drain().await
    }
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
