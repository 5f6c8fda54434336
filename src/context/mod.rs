//! Caller-owned cancellation and deadline carried into guarded calls.

use crate::error::{ResilienceError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cancellation flag plus optional deadline.
///
/// Clones share the cancellation flag, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context whose deadline is `timeout` from now.
    ///
    /// An existing earlier deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context with the given deadline, keeping any earlier one
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The reason this context is done, if it is.
    ///
    /// Cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<ResilienceError> {
        if self.is_cancelled() {
            return Some(ResilienceError::ContextCanceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(ResilienceError::ContextDeadlineExceeded)
            }
            _ => None,
        }
    }

    /// `Err` with the done reason, `Ok` while the context is live
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
