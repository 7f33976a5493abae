//! Child lifecycle supervision (§4.3.2, §9 DESIGN NOTES "Supervisor").
//!
//! The original ran each behaviour's lifecycle through a generic service
//! framework. That framework doesn't translate into an idiomatic,
//! zero-cost Rust shape, so it is re-architected here as a small, explicit
//! [`Supervisor`]: children start in the order they were added and stop in
//! the reverse order, with the whole shutdown bounded by a single
//! deadline.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, warn};

/// Errors raised while starting or stopping supervised children (§7).
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A child failed to start.
    #[error("child '{name}' failed to start: {reason}")]
    ChildStartFailed {
        /// The failing child's name.
        name: String,
        /// The underlying failure.
        reason: String,
    },
    /// A child failed to stop cleanly; shutdown continues regardless.
    #[error("child '{name}' failed to stop: {reason}")]
    ChildStopFailed {
        /// The failing child's name.
        name: String,
        /// The underlying failure.
        reason: String,
    },
    /// The overall shutdown deadline elapsed before every child finished
    /// stopping.
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

/// A unit a [`Supervisor`] can start and stop.
#[async_trait]
pub trait Child: Send + Sync {
    /// A human-readable name used in logs and errors.
    fn name(&self) -> String;
    /// Starts the child. Called in insertion order.
    async fn start(&self) -> Result<(), SupervisorError>;
    /// Stops the child. Called in reverse insertion order.
    async fn stop(&self) -> Result<(), SupervisorError>;
}

/// Tracks a set of [`Child`]ren in insertion order and drives their
/// startup and graceful shutdown.
#[derive(Default)]
pub struct Supervisor {
    children: Mutex<Vec<Arc<dyn Child>>>,
}

impl Supervisor {
    /// Creates an empty supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a child, to be started after every previously-added
    /// child and stopped before them.
    pub fn add(&self, child: Arc<dyn Child>) {
        self.children.lock().push(child);
    }

    /// Removes a previously-added child by name, if present.
    pub fn remove(&self, name: &str) {
        self.children.lock().retain(|c| c.name() != name);
    }

    /// Returns a snapshot of the currently supervised children's names, in
    /// start order.
    pub fn names(&self) -> Vec<String> {
        self.children.lock().iter().map(|c| c.name()).collect()
    }

    /// Starts every child in insertion order. Stops at the first failure,
    /// leaving already-started children running (the caller decides
    /// whether to unwind via [`Supervisor::shutdown`]).
    pub async fn start_all(&self) -> Result<(), SupervisorError> {
        let children = self.children.lock().clone();
        for child in &children {
            child.start().await.map_err(|e| SupervisorError::ChildStartFailed {
                name: child.name(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Stops every child in reverse insertion order, bounded overall by
    /// `timeout`. A child that fails to stop is logged and skipped rather
    /// than aborting the rest of the shutdown, so one misbehaving child
    /// cannot block the others (§4.3.2 step 2).
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SupervisorError> {
        let children = self.children.lock().clone();
        let deadline = tokio::time::Instant::now() + timeout;
        for child in children.iter().rev() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                error!(child = %child.name(), "shutdown deadline elapsed before stopping child");
                return Err(SupervisorError::ShutdownTimeout(timeout));
            }
            match tokio::time::timeout(remaining, child.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(child = %child.name(), error = %e, "child failed to stop cleanly"),
                Err(_) => {
                    error!(child = %child.name(), "timed out stopping child");
                    return Err(SupervisorError::ShutdownTimeout(timeout));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingChild {
        name: String,
        order: Arc<Mutex<Vec<String>>>,
        fail_stop: bool,
    }

    #[async_trait]
    impl Child for RecordingChild {
        fn name(&self) -> String {
            self.name.clone()
        }

        async fn start(&self) -> Result<(), SupervisorError> {
            self.order.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self) -> Result<(), SupervisorError> {
            self.order.lock().push(format!("stop:{}", self.name));
            if self.fail_stop {
                return Err(SupervisorError::ChildStopFailed {
                    name: self.name.clone(),
                    reason: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn stops_in_reverse_start_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let supervisor = Supervisor::new();
        for name in ["a", "b", "c"] {
            supervisor.add(Arc::new(RecordingChild {
                name: name.to_string(),
                order: Arc::clone(&order),
                fail_stop: false,
            }));
        }
        supervisor.start_all().await.unwrap();
        supervisor.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            *order.lock(),
            vec!["start:a", "start:b", "start:c", "stop:c", "stop:b", "stop:a"]
        );
    }

    #[tokio::test]
    async fn one_failing_child_does_not_block_the_rest() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let supervisor = Supervisor::new();
        supervisor.add(Arc::new(RecordingChild {
            name: "a".to_string(),
            order: Arc::clone(&order),
            fail_stop: false,
        }));
        supervisor.add(Arc::new(RecordingChild {
            name: "b".to_string(),
            order: Arc::clone(&order),
            fail_stop: true,
        }));
        supervisor.start_all().await.unwrap();
        supervisor.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(*order.lock(), vec!["start:a", "start:b", "stop:b", "stop:a"]);
    }

    #[tokio::test]
    async fn deadline_elapsing_surfaces_shutdown_timeout() {
        struct SlowChild;
        #[async_trait]
        impl Child for SlowChild {
            fn name(&self) -> String {
                "slow".to_string()
            }
            async fn start(&self) -> Result<(), SupervisorError> {
                Ok(())
            }
            async fn stop(&self) -> Result<(), SupervisorError> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        }
        let supervisor = Supervisor::new();
        supervisor.add(Arc::new(SlowChild));
        supervisor.start_all().await.unwrap();
        let err = supervisor.shutdown(Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ShutdownTimeout(_)));
    }

    #[test]
    fn names_reports_insertion_order() {
        let supervisor = Supervisor::new();
        let counter = AtomicUsize::new(0);
        let _ = counter.fetch_add(1, Ordering::SeqCst);
        let order = Arc::new(Mutex::new(Vec::new()));
        supervisor.add(Arc::new(RecordingChild {
            name: "x".to_string(),
            order: Arc::clone(&order),
            fail_stop: false,
        }));
        assert_eq!(supervisor.names(), vec!["x".to_string()]);
    }
}
