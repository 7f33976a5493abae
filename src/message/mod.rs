//! Wire message types: the broker-level [`Envelope`] and the two payload
//! shapes ([`SerializedObject`], [`RpcMessage`]) carried inside its body
//! (§3 DATA MODEL).

pub mod codec;
pub mod envelope;
pub mod payloads;

pub use codec::{CodecError, Payload, RpcMessage, SerializedObject};
pub use envelope::{Envelope, MessageType, CONTENT_TYPE_JSON};
