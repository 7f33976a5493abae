//! In-process [`BrokerChannel`] test double (SPEC_FULL.md §B), standing in
//! for a live AMQP broker so the runtime's scenarios can be exercised
//! without one. Mirrors the teacher's
//! `broker::in_memory::InMemoryMessageBroker` (an `Arc`-wrapped shared
//! registry, cheap to clone) but keyed on concrete queue/exchange names
//! instead of a generic actor registry.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use crate::broker::error::BrokerError;
use crate::broker::traits::BrokerChannel;
use crate::message::Envelope;
use crate::util::AgentId;

struct TopicQueue {
    routing_keys: Vec<String>,
    sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct Inner {
    direct: HashMap<String, mpsc::UnboundedSender<Envelope>>,
    fanout: Vec<mpsc::UnboundedSender<Envelope>>,
    topic: HashMap<String, TopicQueue>,
}

/// A shared, in-process stand-in for an AMQP broker. Clone to hand every
/// simulated agent connection its own cheap handle onto the same
/// exchanges and queues.
#[derive(Clone)]
pub struct InMemoryBrokerChannel {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryBrokerChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBrokerChannel {
    /// Creates a fresh, empty broker with no declared exchanges or queues.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }
}

/// Matches an AMQP topic-exchange routing key against a binding pattern:
/// `*` matches exactly one dot-separated word, `#` matches zero or more.
fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let p: Vec<&str> = pattern.split('.').collect();
    let k: Vec<&str> = routing_key.split('.').collect();
    matches_rec(&p, &k)
}

fn matches_rec(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.first() {
        None => key.is_empty(),
        Some(&"#") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=key.len()).any(|skip| matches_rec(&pattern[1..], &key[skip..]))
        }
        Some(&"*") => !key.is_empty() && matches_rec(&pattern[1..], &key[1..]),
        Some(seg) => key.first() == Some(seg) && matches_rec(&pattern[1..], &key[1..]),
    }
}

#[async_trait]
impl BrokerChannel for InMemoryBrokerChannel {
    async fn declare_exchanges(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn declare_agent_queues(&self, identity: &AgentId) -> Result<mpsc::UnboundedReceiver<Envelope>, BrokerError> {
        let mut inner = self.inner.lock();
        if inner.direct.contains_key(identity.as_str()) {
            return Err(BrokerError::IdentityConflict(identity.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.direct.insert(identity.as_str().to_string(), tx.clone());
        inner.fanout.push(tx);
        Ok(rx)
    }

    async fn declare_pubsub_queue(
        &self,
        name: &str,
        routing_keys: &[String],
    ) -> Result<mpsc::UnboundedReceiver<Envelope>, BrokerError> {
        let mut inner = self.inner.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        inner.topic.insert(
            name.to_string(),
            TopicQueue {
                routing_keys: routing_keys.to_vec(),
                sender: tx,
            },
        );
        Ok(rx)
    }

    async fn unbind_pubsub_queue(&self, name: &str, routing_keys: &[String]) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        if let Some(queue) = inner.topic.get_mut(name) {
            queue.routing_keys.retain(|k| !routing_keys.contains(k));
        }
        Ok(())
    }

    async fn delete_pubsub_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.inner.lock().topic.remove(name);
        Ok(())
    }

    async fn publish_direct(&self, target: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let inner = self.inner.lock();
        match inner.direct.get(target) {
            Some(sender) => sender
                .send(envelope)
                .map_err(|_| BrokerError::Publish(format!("queue '{target}' is closed"))),
            // A nonexistent target is a broker-side drop, not a publish
            // failure (§4.1): only an RPC await's own timeout observes it.
            None => Ok(()),
        }
    }

    async fn publish_fanout(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let inner = self.inner.lock();
        for sender in &inner.fanout {
            let _ = sender.send(envelope.clone());
        }
        Ok(())
    }

    async fn publish_topic(&self, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let inner = self.inner.lock();
        for queue in inner.topic.values() {
            if queue.routing_keys.iter().any(|pattern| topic_matches(pattern, routing_key)) {
                let _ = queue.sender.send(envelope.clone());
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        inner.direct.clear();
        inner.fanout.clear();
        inner.topic.clear();
        Ok(())
    }
}
