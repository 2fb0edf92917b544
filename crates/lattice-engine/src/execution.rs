//! Statement executions: cancellation and timeout checks.
//!
//! Each statement carries one `Execution`. The batching pipeline checks
//! it before and between batch loads; in-flight SQL observes the same
//! flag through its load futures.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lattice_common::error::{LatticeError, LatticeResult};

/// Cancellation and timeout state of one statement execution.
#[derive(Debug)]
pub struct Execution {
    id: u64,
    cancelled: AtomicBool,
    started_at: Instant,
    timeout: Option<Duration>,
}

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

impl Execution {
    /// Creates an execution with no timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// Creates an execution that times out after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            id: NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed),
            cancelled: AtomicBool::new(false),
            started_at: Instant::now(),
            timeout,
        }
    }

    /// Returns the execution id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requests cancellation of the statement.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fails with `Cancelled` or `Timeout` if the statement should stop.
    pub fn check_cancel_or_timeout(&self) -> LatticeResult<()> {
        if self.is_cancelled() {
            return Err(LatticeError::Cancelled);
        }
        if let Some(timeout) = self.timeout {
            let elapsed = self.started_at.elapsed();
            if elapsed > timeout {
                return Err(LatticeError::Timeout {
                    duration_ms: elapsed.as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

impl Default for Execution {
    fn default() -> Self {
        Self::new()
    }
}
