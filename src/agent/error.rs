//! The agent-level error aggregate (§7), collecting every sub-error a
//! caller of [`super::Agent`] might see behind `#[from]` conversions —
//! mirroring the teacher's `system::errors::SystemError`.

use std::time::Duration;

use thiserror::Error;

use crate::broker::BrokerError;
use crate::handler::HandlerError;
use crate::message::CodecError;
use crate::supervisor::SupervisorError;
use crate::util::InvalidIdentity;

/// Errors an [`super::Agent`] or [`crate::behaviour::Behaviour`] operation
/// may return.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent's configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The configured identity was not a valid [`crate::util::AgentId`].
    #[error(transparent)]
    InvalidIdentity(#[from] InvalidIdentity),
    /// A broker-level failure (connection, topology, publish, consume).
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// A system or user handler failed while processing a message.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// Encoding or decoding a message body failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Starting or stopping a supervised child failed.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    /// An RPC call received no response within its configured timeout.
    #[error("RpcError: no response within {0:?}")]
    RpcTimeout(Duration),
    /// An operation requires a lifecycle transition the agent or
    /// behaviour is not currently in a state to perform (e.g. starting an
    /// already-running agent).
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
    /// The agent's owning `Arc` has already been dropped; a behaviour
    /// tried to use its non-owning reference after the fact.
    #[error("agent is no longer alive")]
    AgentGone,
    /// The entity was permanently killed and cannot be reset or restarted.
    #[error("'{0}' has been killed and cannot be restarted")]
    Killed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn agent_error_is_send_sync() {
        assert_send_sync::<AgentError>();
    }
}
