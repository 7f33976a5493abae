//! Concrete payload types carried inside [`super::codec::SerializedObject`]
//! and [`super::codec::RpcMessage`] envelopes (§3 DATA MODEL).

// Layer 1: Standard library imports
use std::convert::TryFrom;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::message::codec::Payload;
use crate::util::serde_helpers::unix_timestamp;

/// `request_type` discriminator carried by [`super::codec::RpcMessage`]
/// (§3: `{REQUEST=1, RESPONSE=2}`), transcoded as the literal integer on the
/// wire (§6: "`request_type` is an integer").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RequestType {
    /// An RPC request awaiting a response.
    Request,
    /// A response to a previously-sent request.
    Response,
}

impl TryFrom<u8> for RequestType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            other => Err(format!("invalid request_type: {other}")),
        }
    }
}

impl From<RequestType> for u8 {
    fn from(value: RequestType) -> Self {
        match value {
            RequestType::Request => 1,
            RequestType::Response => 2,
        }
    }
}

/// The command carried by a [`ManageBehav`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviourCommand {
    /// Start a stopped behaviour.
    Start,
    /// Stop a running behaviour.
    Stop,
}

/// RPC ping (§3). Request carries `ping: "ping"`; no fields of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Always `"ping"`, mirroring the original's fixed-value field.
    #[serde(default = "default_ping")]
    pub ping: String,
}

fn default_ping() -> String {
    "ping".to_string()
}

impl Default for Ping {
    fn default() -> Self {
        Self { ping: default_ping() }
    }
}

impl Payload for Ping {
    const C_TYPE: &'static str = "Ping";
}

/// RPC pong, the reply to [`Ping`] (§4.4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Always `"pong"`.
    #[serde(default = "default_pong")]
    pub pong: String,
}

fn default_pong() -> String {
    "pong".to_string()
}

impl Default for Pong {
    fn default() -> Self {
        Self { pong: default_pong() }
    }
}

impl Payload for Pong {
    const C_TYPE: &'static str = "Pong";
}

/// Lists the identities of an agent's behaviours (§4.4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBehav {
    /// Identities of the agent's behaviours; empty on request, populated on
    /// response.
    #[serde(default)]
    pub behavs: Vec<String>,
}

impl Payload for ListBehav {
    const C_TYPE: &'static str = "ListBehav";
}

/// Starts or stops a behaviour by suffix-matched name (§4.4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManageBehav {
    /// Suffix used to resolve the target behaviour via
    /// [`crate::agent::Agent::get_behaviour`].
    pub behav: Option<String>,
    /// The requested action.
    pub command: Option<BehaviourCommand>,
    /// Human-readable outcome, populated on response.
    #[serde(default)]
    pub result: String,
}

impl Payload for ManageBehav {
    const C_TYPE: &'static str = "ManageBehav";
}

/// Queries the agent's trace store (§4.4.2, §4.6).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTraceStore {
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Restrict to events whose sender matches this agent identity.
    pub app_id: Option<String>,
    /// Restrict to events tagged with this category.
    pub category: Option<String>,
    /// The matching entries, serialized as opaque strings; empty on
    /// request, populated on response.
    #[serde(default)]
    pub traces: Vec<String>,
}

impl Payload for ListTraceStore {
    const C_TYPE: &'static str = "ListTraceStore";
}

/// Requests a graceful agent shutdown (§4.4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown {
    /// Human-readable outcome, populated on response.
    #[serde(default)]
    pub result: String,
}

impl Payload for Shutdown {
    const C_TYPE: &'static str = "Shutdown";
}

/// Carries an error in place of the requested response payload (§7).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    /// Human-readable error description.
    #[serde(default)]
    pub error: String,
}

impl Payload for RpcErrorPayload {
    const C_TYPE: &'static str = "RpcError";
}

/// Control-channel presence ping, broadcast over the fanout exchange
/// (§4.3.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingControl {}

impl Payload for PingControl {
    const C_TYPE: &'static str = "PingControl";
}

/// A single behaviour's lifecycle status, as carried inside [`CoreStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// The behaviour's full identity.
    pub name: String,
    /// The behaviour's current lifecycle state, as a display string.
    pub state: String,
}

/// An agent's full presence status, returned in a [`PongControl`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreStatus {
    /// The agent's identity.
    pub name: String,
    /// The agent's current lifecycle state, as a display string.
    pub state: String,
    /// Status of every child behaviour.
    pub behaviours: Vec<ServiceStatus>,
}

/// Control-channel presence reply (§4.3.1, §4.4.1). Its `correlation_id`
/// (on the envelope, not in this payload) echoes the ping it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongControl {
    /// The replying agent's status snapshot.
    pub status: CoreStatus,
}

impl Payload for PongControl {
    const C_TYPE: &'static str = "PongControl";
}

/// Example user-defined payload used to exercise the codec's extensibility
/// and the envelope round-trip scenario (§8 S8). Not part of the system
/// handler set — a stand-in for whatever payload types an embedding
/// application registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoData {
    /// Free-form text payload.
    pub message: String,
    /// A UTC timestamp, carried on the wire as Unix seconds (§6).
    #[serde(with = "unix_timestamp")]
    pub date: DateTime<Utc>,
}

impl Payload for DemoData {
    const C_TYPE: &'static str = "DemoData";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_type_transcodes_to_spec_integers() {
        assert_eq!(u8::from(RequestType::Request), 1);
        assert_eq!(u8::from(RequestType::Response), 2);
        assert_eq!(RequestType::try_from(1).unwrap(), RequestType::Request);
        assert_eq!(RequestType::try_from(2).unwrap(), RequestType::Response);
        assert!(RequestType::try_from(3).is_err());
    }

    #[test]
    fn behaviour_command_serializes_lowercase() {
        let json = serde_json::to_string(&BehaviourCommand::Start).unwrap();
        assert_eq!(json, "\"start\"");
    }

    #[test]
    fn demo_data_serializes_date_as_unix_seconds() {
        let dt = DateTime::parse_from_rfc3339("2019-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let demo = DemoData {
            message: "Hallo".to_string(),
            date: dt,
        };
        let json = serde_json::to_string(&demo).unwrap();
        assert_eq!(json, r#"{"message":"Hallo","date":1546300800.0}"#);
    }
}
