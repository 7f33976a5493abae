//! Identity and correlation types shared across the runtime.

// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Layer 3: Internal module imports
// (none)

/// An agent's identity: a non-empty string, unique across the broker address
/// space (§3 DATA MODEL, invariant 1).
///
/// Uniqueness itself is not enforced by this type — it is enforced at
/// channel-bind time by exclusive ownership of the direct queue named by the
/// identity (see [`crate::broker`]). This type only rules out the
/// unconditionally-invalid case of an empty identity.
///
/// # Examples
///
/// ```rust
/// use agentrt::util::AgentId;
///
/// let id = AgentId::new("core1").unwrap();
/// assert_eq!(id.as_str(), "core1");
/// assert!(AgentId::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

/// Error returned when constructing an [`AgentId`] or [`BehaviourId`] from an
/// invalid string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("identity must be a non-empty string")]
pub struct InvalidIdentity;

impl AgentId {
    /// Validates and wraps `identity` as an agent identity.
    pub fn new(identity: impl Into<String>) -> Result<Self, InvalidIdentity> {
        let identity = identity.into();
        if identity.is_empty() {
            return Err(InvalidIdentity);
        }
        Ok(Self(identity))
    }

    /// Generates a random identity (`uuid` string), used when the embedding
    /// application does not care to name the agent explicitly.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the identity of a behaviour named `class_name` owned by this
    /// agent: `"<agent-identity>.<behaviour-class-name>"` (§3 DATA MODEL).
    pub fn behaviour_id(&self, class_name: impl AsRef<str>) -> BehaviourId {
        BehaviourId(format!("{}.{}", self.0, class_name.as_ref()))
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A behaviour's identity: `"<agent-identity>.<behaviour-class-name>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BehaviourId(String);

impl BehaviourId {
    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identity ends with `suffix`, used by
    /// `Agent::get_behaviour` to resolve a behaviour by its short name
    /// (§4.3 — `get_behaviour` returns the unique behaviour whose identity
    /// ends with `name`).
    pub fn matches_suffix(&self, suffix: &str) -> bool {
        self.0.ends_with(suffix)
    }
}

impl Display for BehaviourId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier correlating an RPC request with its response
/// (§3 DATA MODEL — "correlation id").
///
/// Also used to key presence pongs by their originating ping (§4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a new random correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a correlation id carried on the wire as a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_rejects_empty() {
        assert!(AgentId::new("").is_err());
        assert!(AgentId::new("core1").is_ok());
    }

    #[test]
    fn behaviour_id_formats_with_dot() {
        let agent = AgentId::new("core1").unwrap();
        let behav = agent.behaviour_id("EmptyBehav");
        assert_eq!(behav.as_str(), "core1.EmptyBehav");
    }

    #[test]
    fn behaviour_id_suffix_match() {
        let agent = AgentId::new("core1").unwrap();
        let behav = agent.behaviour_id("PingBehaviour");
        assert!(behav.matches_suffix("PingBehaviour"));
        assert!(behav.matches_suffix("core1.PingBehaviour"));
        assert!(!behav.matches_suffix("OtherBehaviour"));
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn correlation_id_roundtrips_through_string() {
        let id = CorrelationId::new();
        let parsed = CorrelationId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
