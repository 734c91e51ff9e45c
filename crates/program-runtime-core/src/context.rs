//! Execution context: cancellation and deadlines for a call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use program_runtime_common::RuntimeError;

/// Cancellation and deadline state observed by a call.
///
/// Clones share the cancellation flag, so a handle kept by another thread can
/// cancel a call in flight. Guest code cannot be preempted mid-instruction;
/// the flag is observed before the call starts, on entry to every host import,
/// and at epoch deadlines when epoch interruption is enabled.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context that also expires after `timeout`.
    ///
    /// The derived context shares the cancellation flag.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    /// Cancel every call observing this context.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail with `Cancelled` if the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<(), RuntimeError> {
        if self.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(RuntimeError::Cancelled);
        }
        Ok(())
    }
}
