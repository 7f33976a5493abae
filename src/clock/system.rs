//! Real-time clock backed by `tokio::time`.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

// Layer 3: Internal module imports
use crate::clock::{Clock, TimerHandle};

/// Monotonic, OS-backed clock. The zero point of [`Clock::time`] is this
/// clock's construction time.
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Creates a new real-time clock, anchored to "now".
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn utcnow(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn sleep_until(&self, deadline: f64) {
        let now = self.time();
        if deadline > now {
            tokio::time::sleep(Duration::from_secs_f64(deadline - now)).await;
        }
    }

    fn call_in(&self, duration: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let handle = TimerHandle::new();
        let guard = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if !guard.is_cancelled() {
                callback();
            }
        });
        handle
    }

    fn call_at(&self, deadline: f64, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let now = self.time();
        let duration = if deadline > now {
            Duration::from_secs_f64(deadline - now)
        } else {
            Duration::ZERO
        };
        self.call_in(duration, callback)
    }
}
