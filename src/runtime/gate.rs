//! Admission control for CLI child processes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission was refused because every slot is taken.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Concurrency limit reached ({limit} active invocations), retry after {}s", .retry_after.as_secs())]
pub struct ConcurrencyLimitError {
    /// Configured ceiling.
    pub limit: usize,
    /// Suggested delay before retrying.
    pub retry_after: Duration,
}

/// Bounded, non-queueing gate in front of process spawning.
///
/// [`acquire`](Self::acquire) never waits: past the ceiling it fails and the
/// caller is expected to surface a retryable error.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    limit: usize,
    retry_after: Duration,
}

/// Capacity held for the lifetime of one invocation.
///
/// The slot goes back to the gate exactly once, when it is dropped or
/// [`release`](Self::release)d, on every exit path.
#[derive(Debug)]
#[must_use = "dropping a slot releases it immediately"]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    /// Return the slot to its gate.
    pub fn release(self) {}
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `limit` concurrent invocations.
    #[must_use]
    pub fn new(limit: usize, retry_after: Duration) -> Self {
        let limit = limit.min(Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            retry_after,
        }
    }

    /// Take a slot without waiting.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrencyLimitError` when `limit` slots are already held.
    pub fn acquire(&self) -> Result<Slot, ConcurrencyLimitError> {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| ConcurrencyLimitError {
                limit: self.limit,
                retry_after: self.retry_after,
            })?;
        Ok(Slot { _permit: permit })
    }

    /// Number of slots currently held.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Configured ceiling.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Suggested retry delay reported on refusal.
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }
}
