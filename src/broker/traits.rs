//! The [`BrokerChannel`] interface (§4.1), implemented by
//! [`super::amqp::AmqpBrokerChannel`] against a live broker and by
//! [`super::in_memory::InMemoryBrokerChannel`] for tests.

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use crate::broker::error::BrokerError;
use crate::message::Envelope;
use crate::util::AgentId;

/// Transport-level operations an agent needs from the broker (§4.1).
///
/// Each `declare_*` method returns a channel that yields every message
/// delivered to the queue(s) it declares; the caller drives delivery by
/// reading from it, rather than registering a callback. This mirrors the
/// mailbox-as-channel idiom used throughout this runtime instead of the
/// original's callback-based consumer registration.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares the topic exchange (pub-sub routing) and the admin fanout
    /// exchange (presence broadcast), idempotently.
    async fn declare_exchanges(&self) -> Result<(), BrokerError>;

    /// Declares `identity`'s exclusive direct queue and an anonymous
    /// fanout queue bound to the admin exchange, returning a receiver fed
    /// by both. Fails with [`BrokerError::IdentityConflict`] if `identity`
    /// is already claimed.
    async fn declare_agent_queues(&self, identity: &AgentId) -> Result<mpsc::UnboundedReceiver<Envelope>, BrokerError>;

    /// Declares a non-durable queue named `name`, bound to the topic
    /// exchange under every key in `routing_keys`, returning a receiver
    /// fed by it (§4.2.1).
    async fn declare_pubsub_queue(
        &self,
        name: &str,
        routing_keys: &[String],
    ) -> Result<mpsc::UnboundedReceiver<Envelope>, BrokerError>;

    /// Removes bindings previously installed by
    /// [`BrokerChannel::declare_pubsub_queue`] for `routing_keys`.
    async fn unbind_pubsub_queue(&self, name: &str, routing_keys: &[String]) -> Result<(), BrokerError>;

    /// Deletes a queue previously declared by
    /// [`BrokerChannel::declare_pubsub_queue`].
    async fn delete_pubsub_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Publishes directly to the queue named `target`.
    async fn publish_direct(&self, target: &str, envelope: Envelope) -> Result<(), BrokerError>;

    /// Publishes to the admin fanout exchange, reaching every connected
    /// agent's anonymous queue.
    async fn publish_fanout(&self, envelope: Envelope) -> Result<(), BrokerError>;

    /// Publishes to the topic exchange under `routing_key`.
    async fn publish_topic(&self, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError>;

    /// Closes the channel and its underlying connection. Idempotent.
    async fn close(&self) -> Result<(), BrokerError>;
}
