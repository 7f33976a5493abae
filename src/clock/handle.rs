//! Cancellable handle for scheduled calls.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
// (none)

/// Handle returned by [`crate::clock::Clock::call_in`] /
/// [`crate::clock::Clock::call_at`] that lets the caller cancel the
/// scheduled call before it fires.
///
/// Both clock implementations check [`TimerHandle::is_cancelled`]
/// immediately before invoking the scheduled callback, so cancelling after
/// the deadline has already been evaluated is a (harmless) no-op — this
/// mirrors the original's `ExternalClock`, which skips firing a cancelled
/// future rather than removing it from the queue eagerly.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancels the scheduled call represented by this handle.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether this handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observable() {
        let handle = TimerHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn clones_share_cancellation_state() {
        let handle = TimerHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
    }
}
