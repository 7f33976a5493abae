//! Externally-driven virtual clock (§4.7, §9 DESIGN NOTES "Clocks").

// Layer 1: Standard library imports
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

// Layer 3: Internal module imports
use crate::clock::{Clock, TimerHandle};

/// Error returned by [`VirtualClock::set_time`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VirtualClockError {
    /// `set_time` was called with a value not strictly greater than the
    /// clock's current time.
    #[error("time must be strictly greater than {current} but was {attempted}")]
    NonIncreasingTime {
        /// The clock's time before the rejected call.
        current: u64,
        /// The value that was rejected (scaled to milliseconds for display).
        attempted: u64,
    },
}

enum Action {
    Wake(oneshot::Sender<()>),
    Call(Box<dyn FnOnce() + Send>),
}

struct ScheduledEntry {
    deadline_millis: u64,
    seq: u64,
    action: Action,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_millis == other.deadline_millis && self.seq == other.seq
    }
}
impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    /// Reversed so that [`BinaryHeap`] (a max-heap) pops the *smallest*
    /// `(deadline, seq)` pair first — ties on deadline broken by insertion
    /// order, exactly as §9 specifies.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline_millis
            .cmp(&self.deadline_millis)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    time_millis: u64,
    utc_start: DateTime<Utc>,
    queue: BinaryHeap<ScheduledEntry>,
    next_seq: u64,
}

/// A clock whose notion of "now" is advanced explicitly by
/// [`VirtualClock::set_time`], used to synchronize the runtime with an
/// external simulator or driver rather than the OS clock.
///
/// Advancing time fires every scheduled callback whose deadline has been
/// reached, in deadline order (ties broken by insertion order).
pub struct VirtualClock {
    inner: Mutex<Inner>,
}

impl VirtualClock {
    /// Creates a virtual clock starting at `utc_start`, with internal time
    /// at zero.
    pub fn new(utc_start: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                time_millis: 0,
                utc_start,
                queue: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Advances the clock to `t` seconds (measured from construction). `t`
    /// must be strictly greater than the current time. Fires every
    /// scheduled, non-cancelled callback whose deadline is now `<= t`, in
    /// deadline order with ties broken by insertion order.
    pub fn set_time(&self, t: f64) -> Result<(), VirtualClockError> {
        let new_millis = (t * 1000.0).round() as u64;
        let mut ready = Vec::new();
        {
            let mut inner = self.inner.lock();
            if new_millis <= inner.time_millis {
                return Err(VirtualClockError::NonIncreasingTime {
                    current: inner.time_millis,
                    attempted: new_millis,
                });
            }
            inner.time_millis = new_millis;
            while let Some(top) = inner.queue.peek() {
                if top.deadline_millis > new_millis {
                    break;
                }
                // Safe: we just confirmed the heap is non-empty via `peek`.
                if let Some(entry) = inner.queue.pop() {
                    ready.push(entry);
                }
            }
        }
        for entry in ready {
            match entry.action {
                Action::Wake(tx) => {
                    let _ = tx.send(());
                }
                Action::Call(callback) => callback(),
            }
        }
        Ok(())
    }

    fn schedule(&self, deadline: f64, action: Action) {
        let deadline_millis = (deadline * 1000.0).round() as u64;
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(ScheduledEntry {
            deadline_millis,
            seq,
            action,
        });
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn time(&self) -> f64 {
        self.inner.lock().time_millis as f64 / 1000.0
    }

    fn utcnow(&self) -> DateTime<Utc> {
        let inner = self.inner.lock();
        inner.utc_start + chrono::Duration::milliseconds(inner.time_millis as i64)
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.time() + duration.as_secs_f64();
        self.sleep_until(deadline).await;
    }

    async fn sleep_until(&self, deadline: f64) {
        if deadline <= self.time() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.schedule(deadline, Action::Wake(tx));
        let _ = rx.await;
    }

    fn call_in(&self, duration: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        self.call_at(self.time() + duration.as_secs_f64(), callback)
    }

    fn call_at(&self, deadline: f64, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let handle = TimerHandle::new();
        if deadline <= self.time() {
            if !handle.is_cancelled() {
                callback();
            }
            return handle;
        }
        let guard = handle.clone();
        self.schedule(
            deadline,
            Action::Call(Box::new(move || {
                if !guard.is_cancelled() {
                    callback();
                }
            })),
        );
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn set_time_rejects_non_increasing() {
        let clock = VirtualClock::new(Utc::now());
        clock.set_time(1.0).unwrap();
        assert!(clock.set_time(1.0).is_err());
        assert!(clock.set_time(0.5).is_err());
    }

    #[tokio::test]
    async fn call_at_fires_in_deadline_order_with_fifo_ties() {
        let clock = VirtualClock::new(Utc::now());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        clock.call_at(2.0, Box::new(move || o1.lock().push("b")));
        let o2 = Arc::clone(&order);
        clock.call_at(1.0, Box::new(move || o2.lock().push("a")));
        let o3 = Arc::clone(&order);
        clock.call_at(1.0, Box::new(move || o3.lock().push("a2")));

        clock.set_time(3.0).unwrap();
        assert_eq!(*order.lock(), vec!["a", "a2", "b"]);
    }

    #[tokio::test]
    async fn cancelled_call_at_does_not_fire() {
        let clock = VirtualClock::new(Utc::now());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = clock.call_at(1.0, Box::new(move || flag.store(true, Ordering::SeqCst)));
        handle.cancel();
        clock.set_time(2.0).unwrap();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn sleep_until_resolves_when_time_reaches_deadline() {
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let waiter = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move {
                clock.sleep_until(1.0).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        clock.set_time(1.0).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
