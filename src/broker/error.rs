//! Broker error taxonomy (§7).

use thiserror::Error;

/// Errors surfaced by a [`super::BrokerChannel`] implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection to the broker could not be established or was lost
    /// beyond the configured retry budget.
    #[error("failed to connect to broker at {url}: {reason}")]
    Connection {
        /// The broker URL that was being connected to.
        url: String,
        /// The underlying failure.
        reason: String,
    },
    /// An agent's direct queue name was already claimed by another
    /// connection (§3 invariant: "an agent identity is unique while
    /// connected").
    #[error("identity already claimed: {0}")]
    IdentityConflict(String),
    /// Declaring, binding, or deleting an exchange/queue failed.
    #[error("topology operation failed: {0}")]
    Topology(String),
    /// Publishing a message failed.
    #[error("publish failed: {0}")]
    Publish(String),
    /// Starting or continuing a consumer failed.
    #[error("consume failed: {0}")]
    Consume(String),
    /// The channel was already closed when the operation was attempted.
    #[error("broker channel is closed")]
    Closed,
}
