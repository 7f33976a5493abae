//! The [`Clock`] interface (§4.7).

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::{DateTime, Utc}; // §3.2 MANDATORY

// Layer 3: Internal module imports
use crate::clock::TimerHandle;

/// Shared interface implemented by [`crate::clock::SystemClock`] (real time)
/// and [`crate::clock::VirtualClock`] (externally-driven virtual time).
///
/// # Examples
///
/// ```rust
/// use agentrt::clock::{Clock, SystemClock};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let clock = SystemClock::new();
/// let now = clock.utcnow();
/// assert!(clock.utcnow() >= now);
/// # }
/// ```
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic seconds; consecutive calls never decrease.
    fn time(&self) -> f64;

    /// A timezone-aware UTC timestamp.
    fn utcnow(&self) -> DateTime<Utc>;

    /// Sleeps for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Sleeps until monotonic time `deadline` (in the same units as
    /// [`Clock::time`]). A `deadline` already in the past resolves
    /// immediately.
    async fn sleep_until(&self, deadline: f64);

    /// Schedules `callback` to run after `duration` and returns a handle
    /// that can cancel it before it fires.
    fn call_in(&self, duration: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle;

    /// Schedules `callback` to run at monotonic time `deadline` and returns
    /// a handle that can cancel it before it fires.
    fn call_at(&self, deadline: f64, callback: Box<dyn FnOnce() + Send>) -> TimerHandle;
}
