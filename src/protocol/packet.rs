//! Packet types exchanged over the websocket.
//!
//! Every frame is a JSON text message tagged by `type`.
//!
//! # Format
//!
//! ```json
//! { "type": "call",  "id": "uuid", "event": "auth", "args": ["key"] }
//! { "type": "fire",  "event": "chat", "args": ["hi", 1] }
//! { "type": "ack",   "id": "uuid", "result": "pong" }
//! { "type": "error", "id": "uuid", "message": "unknown method" }
//! ```
//!
//! Both peers may send `call` and `fire`. A `call` is answered by exactly
//! one `ack` or `error` carrying the same `id`.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Packet
// ============================================================================

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    /// Request expecting a reply.
    Call {
        /// Correlation ID.
        id: RequestId,
        /// Method name.
        event: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },

    /// One-way event.
    Fire {
        /// Event name.
        event: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Successful reply to a call.
    Ack {
        /// Correlation ID of the call.
        id: RequestId,
        /// Reply value.
        #[serde(default)]
        result: Value,
    },

    /// Failed reply to a call.
    Error {
        /// Correlation ID of the call.
        id: RequestId,
        /// Failure description.
        message: String,
    },
}

impl Packet {
    /// Creates a call packet with a fresh ID.
    #[must_use]
    pub fn call(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Call {
            id: RequestId::generate(),
            event: event.into(),
            args,
        }
    }

    /// Creates a fire packet.
    #[must_use]
    pub fn fire(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Fire {
            event: event.into(),
            args,
        }
    }

    /// Creates an ack carrying a binary payload.
    ///
    /// Binary payloads travel base64-encoded.
    #[must_use]
    pub fn ack_bytes(id: RequestId, payload: &Bytes) -> Self {
        Self::Ack {
            id,
            result: Value::String(Base64Standard.encode(payload)),
        }
    }

    /// Creates an error reply.
    #[must_use]
    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            message: message.into(),
        }
    }

    /// Returns the correlation ID, if the packet has one.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Call { id, .. } | Self::Ack { id, .. } | Self::Error { id, .. } => Some(*id),
            Self::Fire { .. } => None,
        }
    }

    /// Returns `true` if this packet answers a call.
    #[inline]
    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Ack { .. } | Self::Error { .. })
    }

    /// Converts a reply into the call's result.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the reply is an `error` packet
    /// - [`Error::Protocol`] if the packet is not a reply
    pub fn into_reply(self, method: &str) -> Result<Value> {
        match self {
            Self::Ack { result, .. } => Ok(result),
            Self::Error { message, .. } => Err(Error::remote(method, message)),
            other => Err(Error::protocol(format!(
                "expected reply, got {other:?}"
            ))),
        }
    }

    /// Serializes the packet to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the frame is not a valid packet.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Decodes a base64 payload produced by [`Packet::ack_bytes`].
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the value is not a base64 string.
pub fn decode_bytes(value: &Value) -> Result<Bytes> {
    let encoded = value
        .as_str()
        .ok_or_else(|| Error::protocol("binary payload must be a string"))?;

    Base64Standard
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| Error::protocol(format!("invalid base64 payload: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_call_serialization() {
        let packet = Packet::call("auth", vec![json!("key")]);
        let text = packet.to_text().expect("serialize");

        assert!(text.contains("\"type\":\"call\""));
        assert!(text.contains("\"event\":\"auth\""));
        assert!(packet.id().is_some());
        assert!(!packet.is_reply());
    }

    #[test]
    fn test_fire_without_args_parses() {
        let packet = Packet::from_text(r#"{"type":"fire","event":"tick"}"#).expect("parse");
        assert_eq!(packet, Packet::fire("tick", Vec::new()));
        assert!(packet.id().is_none());
    }

    #[test]
    fn test_ack_into_reply() {
        let text = r#"{"type":"ack","id":"550e8400-e29b-41d4-a716-446655440000","result":"pong"}"#;
        let packet = Packet::from_text(text).expect("parse");
        assert!(packet.is_reply());
        assert_eq!(packet.into_reply("ping").expect("ok"), json!("pong"));
    }

    #[test]
    fn test_error_into_reply() {
        let packet = Packet::error(RequestId::generate(), "nope");
        let err = packet.into_reply("ping").unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_fire_into_reply_is_protocol_error() {
        let err = Packet::fire("x", Vec::new()).into_reply("x").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_ack_bytes_is_base64() {
        let packet = Packet::ack_bytes(RequestId::generate(), &Bytes::from_static(b"ok"));
        let Packet::Ack { result, .. } = &packet else {
            panic!("expected ack");
        };
        assert_eq!(result, &json!("b2s="));
        assert_eq!(decode_bytes(result).expect("decode"), Bytes::from_static(b"ok"));
    }

    #[test]
    fn test_decode_bytes_rejects_non_string() {
        assert!(decode_bytes(&json!(1)).is_err());
        assert!(decode_bytes(&json!("***")).is_err());
    }

    #[test]
    fn test_unknown_type_fails() {
        assert!(Packet::from_text(r#"{"type":"bogus"}"#).is_err());
    }
}
