//! Wire codec for the two envelope shapes carried as the body of every
//! [`super::envelope::Envelope`] (§3 DATA MODEL, §9 DESIGN NOTES "Codec
//! registry").
//!
//! The original runtime resolved payload types through a dynamic class
//! registry keyed by class name. That pattern has no direct Rust
//! equivalent, so it is re-architected here as an explicit discriminator:
//! every payload implements [`Payload`], which pins a `c_type` string at
//! compile time, and [`SerializedObject`]/[`RpcMessage`] expose generic
//! `encode`/`decode` methods that check the wire `c_type` against it. Any
//! true dynamic dispatch a handler needs (e.g. "is this a `PingControl` or
//! a `PongControl`?") matches on `c_type` through small explicit enums
//! rather than a class lookup table.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Layer 3: Internal module imports
use crate::message::payloads::RequestType;

/// A concrete message payload, self-describing via [`Payload::C_TYPE`].
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The `c_type` discriminator this payload is encoded/decoded under.
    const C_TYPE: &'static str;
}

/// Errors raised while encoding or decoding [`SerializedObject`]/
/// [`RpcMessage`] bodies (§7).
#[derive(Debug, Error)]
pub enum CodecError {
    /// The `c_data` string was not valid JSON, or did not match the shape
    /// the caller asked to decode.
    #[error("message body is not well-formed JSON: {0}")]
    WrongMessageFormat(#[from] serde_json::Error),
    /// The wire `c_type` did not match the type the caller asked to decode.
    #[error("unknown or unexpected message type: {0}")]
    UnknownMessageType(String),
}

/// A control/pub-sub envelope body: a `c_type` discriminator plus its
/// JSON-encoded payload (§3: `{c_type, c_data}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedObject {
    /// Discriminator naming the payload type encoded in `c_data`.
    pub c_type: String,
    /// The payload, itself encoded as a JSON string (not nested JSON).
    pub c_data: String,
}

impl SerializedObject {
    /// Encodes `payload` into a [`SerializedObject`], tagging it with
    /// `T::C_TYPE`.
    pub fn encode<T: Payload>(payload: &T) -> Result<Self, CodecError> {
        Ok(Self {
            c_type: T::C_TYPE.to_string(),
            c_data: serde_json::to_string(payload)?,
        })
    }

    /// Decodes `c_data` as `T`, rejecting a mismatched `c_type`.
    pub fn decode<T: Payload>(&self) -> Result<T, CodecError> {
        if self.c_type != T::C_TYPE {
            return Err(CodecError::UnknownMessageType(self.c_type.clone()));
        }
        Ok(serde_json::from_str(&self.c_data)?)
    }
}

impl fmt::Display for SerializedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerializedObject({})", self.c_type)
    }
}

/// An RPC envelope body: a `c_type`/`c_data` pair plus the `request_type`
/// discriminator distinguishing a request from its response (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcMessage {
    /// Discriminator naming the payload type encoded in `c_data`.
    pub c_type: String,
    /// The payload, itself encoded as a JSON string.
    pub c_data: String,
    /// Whether this is a request awaiting a reply, or a reply itself.
    pub request_type: RequestType,
}

impl RpcMessage {
    /// Builds an [`RpcMessage`] of kind `request_type` carrying `payload`.
    pub fn encode<T: Payload>(payload: &T, request_type: RequestType) -> Result<Self, CodecError> {
        Ok(Self {
            c_type: T::C_TYPE.to_string(),
            c_data: serde_json::to_string(payload)?,
            request_type,
        })
    }

    /// Decodes `c_data` as `T`, rejecting a mismatched `c_type`.
    pub fn decode<T: Payload>(&self) -> Result<T, CodecError> {
        if self.c_type != T::C_TYPE {
            return Err(CodecError::UnknownMessageType(self.c_type.clone()));
        }
        Ok(serde_json::from_str(&self.c_data)?)
    }
}
