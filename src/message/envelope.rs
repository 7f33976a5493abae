//! The broker-level envelope carried over the wire (§3 DATA MODEL, §6).
//!
//! Unlike the teacher's [`MessageEnvelope<M>`] (generic over the payload
//! type so a single mailbox could carry heterogeneous actor messages), this
//! runtime's broker headers and body shape are fixed by the AMQP transport
//! itself, so `Envelope` is concrete: the body is always the JSON encoding
//! of a [`super::codec::SerializedObject`] or [`super::codec::RpcMessage`].

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::clock::Clock;
use crate::util::CorrelationId;

/// The `type` header distinguishing system traffic from user-defined
/// pub-sub topics (§3, §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Presence ping/pong traffic on the admin fanout exchange.
    Control,
    /// Request/response traffic on an agent's direct queue.
    Rpc,
    /// A user-defined pub-sub topic, named verbatim.
    User(String),
}

impl MessageType {
    /// The wire representation of this message type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Control => "CONTROL",
            Self::Rpc => "RPC",
            Self::User(s) => s,
        }
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "CONTROL" => Self::Control,
            "RPC" => Self::Rpc,
            _ => Self::User(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The content type carried on every envelope; this runtime only ever
/// produces and consumes JSON bodies (§4.1).
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A message in flight between agents, carrying the AMQP headers the
/// broker needs to route it plus its JSON body (§3, §6).
///
/// `Envelope` does not carry a recipient: for a direct message the
/// recipient is implied by which queue it is published to, and for a
/// fanout/topic message there is no single recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity of the sending agent (the broker's `app_id` property).
    pub app_id: String,
    /// Discriminates system (CONTROL/RPC) traffic from user-defined topics.
    pub message_type: MessageType,
    /// Correlates a request with its response, or a ping with its pong.
    pub correlation_id: Option<CorrelationId>,
    /// The topic-exchange routing key this message was (or will be)
    /// published under, when relevant.
    pub routing_key: Option<String>,
    /// When the envelope was constructed.
    pub timestamp: DateTime<Utc>,
    /// Always [`CONTENT_TYPE_JSON`].
    pub content_type: String,
    /// The JSON-encoded body: a [`super::codec::SerializedObject`] or
    /// [`super::codec::RpcMessage`].
    pub body: Vec<u8>,
}

impl Envelope {
    /// Builds a new envelope stamped with `clock`'s current time.
    pub fn new(app_id: impl Into<String>, message_type: MessageType, body: Vec<u8>, clock: &dyn Clock) -> Self {
        Self {
            app_id: app_id.into(),
            message_type,
            correlation_id: None,
            routing_key: None,
            timestamp: clock.utcnow(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            body,
        }
    }

    /// Attaches a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Attaches a correlation id if one is given, leaving it unset
    /// otherwise.
    #[must_use]
    pub fn with_correlation_id_opt(mut self, id: Option<CorrelationId>) -> Self {
        self.correlation_id = id;
        self
    }

    /// Attaches the topic-exchange routing key this envelope was published
    /// under.
    #[must_use]
    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }
}
