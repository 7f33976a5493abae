//! Capacity-bounded trace store recording every message an agent sends or
//! receives (§3, §4.6).

// Layer 1: Standard library imports
use std::collections::VecDeque;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::message::Envelope;

/// A single recorded message, annotated with whether this agent sent or
/// received it and under what category it was traced (§4.6: e.g.
/// `"incoming"` for pub-sub deliveries, a correlation id for pong
/// replies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// The recorded envelope.
    pub app_id: String,
    /// The envelope's message type, as a display string.
    pub message_type: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// `true` if this agent sent the message, `false` if it received it.
    pub sent: bool,
    /// Free-form grouping tag (e.g. `"incoming"`, or a correlation id).
    pub category: Option<String>,
    /// The envelope's raw JSON body.
    pub body: String,
}

impl TraceEvent {
    /// Builds a trace event from an envelope.
    pub fn from_envelope(envelope: &Envelope, sent: bool, category: Option<String>) -> Self {
        Self {
            app_id: envelope.app_id.clone(),
            message_type: envelope.message_type.to_string(),
            timestamp: envelope.timestamp,
            sent,
            category,
            body: String::from_utf8_lossy(&envelope.body).into_owned(),
        }
    }
}

struct Inner {
    capacity: usize,
    events: VecDeque<TraceEvent>,
}

/// A ring buffer of [`TraceEvent`]s: the oldest entry is evicted once
/// `capacity` is exceeded (§3 invariant: "the trace store never exceeds
/// its configured capacity").
pub struct TraceStore {
    inner: Mutex<Inner>,
}

impl TraceStore {
    /// Creates an empty trace store bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity,
                events: VecDeque::with_capacity(capacity.min(1024)),
            }),
        }
    }

    /// Appends an event, evicting the oldest entry if the store is full.
    pub fn append(&self, event: TraceEvent) {
        let mut inner = self.inner.lock();
        if inner.capacity == 0 {
            return;
        }
        if inner.events.len() >= inner.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
    }

    /// Returns up to `limit` of the most recent entries, ordered
    /// oldest-first among the selected slice (§4.6).
    pub fn all(&self, limit: Option<usize>) -> Vec<TraceEvent> {
        let inner = self.inner.lock();
        let take = limit.unwrap_or(inner.events.len());
        let mut selected: Vec<TraceEvent> = inner.events.iter().rev().take(take).cloned().collect();
        selected.reverse();
        selected
    }

    /// Returns the single most recently recorded entry, if any.
    pub fn latest(&self) -> Option<TraceEvent> {
        self.inner.lock().events.back().cloned()
    }

    /// Returns up to `limit` of the most recent entries matching `app_id`
    /// and/or `category`, ordered oldest-first among the selected slice
    /// (§4.6).
    pub fn filter(&self, limit: Option<usize>, app_id: Option<&str>, category: Option<&str>) -> Vec<TraceEvent> {
        let inner = self.inner.lock();
        let take = limit.unwrap_or(inner.events.len());
        let mut selected: Vec<TraceEvent> = inner
            .events
            .iter()
            .rev()
            .filter(|e| app_id.map_or(true, |id| e.app_id == id))
            .filter(|e| category.map_or(true, |c| e.category.as_deref() == Some(c)))
            .take(take)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    /// Returns up to `limit` of the most recently received entries
    /// (`sent == false`), ordered oldest-first among the selected slice.
    pub fn received(&self, limit: Option<usize>) -> Vec<TraceEvent> {
        let inner = self.inner.lock();
        let take = limit.unwrap_or(inner.events.len());
        let mut selected: Vec<TraceEvent> = inner.events.iter().rev().filter(|e| !e.sent).take(take).cloned().collect();
        selected.reverse();
        selected
    }

    /// The number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
