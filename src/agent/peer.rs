//! Peer table populated by the presence protocol (§4.3.1).
//!
//! Per the decided reading of an ambiguous original behavior: a pong whose
//! correlation id doesn't match the most recent ping is still recorded
//! (nothing is discarded), but [`PeerTable::list_current`] only surfaces
//! entries matching the *current* ping round, so a slow or duplicate
//! reply from a previous round never pollutes a fresh snapshot.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

// Layer 3: Internal module imports
use crate::message::payloads::CoreStatus;
use crate::util::CorrelationId;

/// A single peer's last-known presence status.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// The peer's identity.
    pub identity: String,
    /// The peer's reported status snapshot.
    pub status: CoreStatus,
    /// The correlation id of the ping this entry answered.
    pub correlation_id: CorrelationId,
    /// When this entry was recorded.
    pub last_seen: DateTime<Utc>,
}

struct Inner {
    entries: HashMap<String, PeerEntry>,
    current_correlation_id: Option<CorrelationId>,
}

/// Capacity-bounded table of known peers, keyed by identity.
pub struct PeerTable {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl PeerTable {
    /// Creates an empty peer table bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                current_correlation_id: None,
            }),
        }
    }

    /// Marks `correlation_id` as the presence protocol's current ping
    /// round.
    pub fn set_current_ping(&self, correlation_id: CorrelationId) {
        self.inner.lock().current_correlation_id = Some(correlation_id);
    }

    /// Records (or refreshes) a peer's reported status.
    pub fn record(&self, identity: String, status: CoreStatus, correlation_id: CorrelationId, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        if self.capacity > 0 && !inner.entries.contains_key(&identity) && inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_seen)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
            }
        }
        if self.capacity > 0 {
            inner.entries.insert(
                identity.clone(),
                PeerEntry {
                    identity,
                    status,
                    correlation_id,
                    last_seen: now,
                },
            );
        }
    }

    /// Returns every peer that answered the current ping round, sorted by
    /// identity.
    pub fn list_current(&self) -> Vec<PeerEntry> {
        let inner = self.inner.lock();
        let Some(current) = inner.current_correlation_id else {
            return Vec::new();
        };
        let mut peers: Vec<PeerEntry> = inner
            .entries
            .values()
            .filter(|e| e.correlation_id == current)
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.identity.cmp(&b.identity));
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &str) -> CoreStatus {
        CoreStatus {
            name: name.to_string(),
            state: "running".to_string(),
            behaviours: Vec::new(),
        }
    }

    #[test]
    fn list_current_excludes_stale_correlation_ids() {
        let table = PeerTable::new(10);
        let first = CorrelationId::new();
        table.set_current_ping(first);
        table.record("b".to_string(), status("b"), first, Utc::now());

        let second = CorrelationId::new();
        table.set_current_ping(second);
        table.record("a".to_string(), status("a"), second, Utc::now());

        let current = table.list_current();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].identity, "a");
    }

    #[test]
    fn list_current_sorts_by_identity() {
        let table = PeerTable::new(10);
        let cid = CorrelationId::new();
        table.set_current_ping(cid);
        table.record("charlie".to_string(), status("charlie"), cid, Utc::now());
        table.record("alice".to_string(), status("alice"), cid, Utc::now());
        table.record("bob".to_string(), status("bob"), cid, Utc::now());
        let names: Vec<_> = table.list_current().into_iter().map(|e| e.identity).collect();
        assert_eq!(names, vec!["alice", "bob", "charlie"]);
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let table = PeerTable::new(0);
        let cid = CorrelationId::new();
        table.set_current_ping(cid);
        table.record("a".to_string(), status("a"), cid, Utc::now());
        assert!(table.list_current().is_empty());
    }
}
