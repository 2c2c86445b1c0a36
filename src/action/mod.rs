//! Application actions consumed and produced by the middleware.
//!
//! # Inbound
//!
//! | Kind | Designator |
//! |------|------------|
//! | `CONNECT_SOCKET` | [`Designator::Connect`] |
//! | `DISCONNECT_SOCKET` | [`Designator::Disconnect`] |
//! | `EMIT_SOCKET` | [`Designator::Emit`] |
//!
//! Any action without a designator, or with a designator on another kind,
//! is passed through untouched.
//!
//! # Outbound
//!
//! | Kind | Payload |
//! |------|---------|
//! | `SOCKET_CONNECTED` | none |
//! | `SOCKET_DISCONNECTED` | none |
//! | `SOCKET_ERROR` | error message |
//! | listener `actionType` | received arguments / hook payload |

// ============================================================================
// Submodules
// ============================================================================

/// Socket designators and their parameter types.
pub mod designator;

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

pub use designator::{Acknowledge, ConnectionConfig, Designator, OutboundCall};

// ============================================================================
// Kinds
// ============================================================================

/// Action kind names.
pub mod kinds {
    /// Request to open the socket.
    pub const CONNECT_SOCKET: &str = "CONNECT_SOCKET";
    /// Request to close the socket.
    pub const DISCONNECT_SOCKET: &str = "DISCONNECT_SOCKET";
    /// Request to send an event or call.
    pub const EMIT_SOCKET: &str = "EMIT_SOCKET";
    /// The socket is open and authenticated.
    pub const SOCKET_CONNECTED: &str = "SOCKET_CONNECTED";
    /// The socket was closed on request.
    pub const SOCKET_DISCONNECTED: &str = "SOCKET_DISCONNECTED";
    /// The transport reported an error.
    pub const SOCKET_ERROR: &str = "SOCKET_ERROR";
}

/// JSON key holding the designator.
pub const DESIGNATOR_KEY: &str = "socket";

/// Alternate JSON key accepted for the designator.
pub const LEGACY_DESIGNATOR_KEY: &str = "bsock";

// ============================================================================
// Action
// ============================================================================

/// An action flowing through the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct Action {
    /// Action kind (the `type` field).
    pub kind: String,
    /// Application payload.
    pub payload: Option<Value>,
    /// Socket designator, if the action targets the socket.
    designator: Option<Designator>,
}

impl Action {
    /// Creates an action without payload.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
            designator: None,
        }
    }

    /// Creates an action with payload.
    #[must_use]
    pub fn with_payload(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
            designator: None,
        }
    }

    /// Creates a `CONNECT_SOCKET` action.
    #[must_use]
    pub fn connect_socket(config: ConnectionConfig) -> Self {
        Self {
            kind: kinds::CONNECT_SOCKET.to_string(),
            payload: None,
            designator: Some(Designator::Connect(config)),
        }
    }

    /// Creates a `DISCONNECT_SOCKET` action.
    #[must_use]
    pub fn disconnect_socket() -> Self {
        Self {
            kind: kinds::DISCONNECT_SOCKET.to_string(),
            payload: None,
            designator: Some(Designator::Disconnect),
        }
    }

    /// Creates an `EMIT_SOCKET` action.
    #[must_use]
    pub fn emit_socket(call: OutboundCall) -> Self {
        Self {
            kind: kinds::EMIT_SOCKET.to_string(),
            payload: None,
            designator: Some(Designator::Emit(call)),
        }
    }

    /// Creates a `SOCKET_ERROR` action carrying the error message.
    #[must_use]
    pub fn socket_error(error: &Error) -> Self {
        Self::with_payload(kinds::SOCKET_ERROR, Value::String(error.to_string()))
    }

    /// Returns the socket designator, if any.
    #[inline]
    #[must_use]
    pub fn designator(&self) -> Option<&Designator> {
        self.designator.as_ref()
    }

    /// Consumes the action, returning its socket designator.
    #[inline]
    #[must_use]
    pub fn into_designator(self) -> Option<Designator> {
        self.designator
    }

    /// Returns `true` if this is an action of the given kind.
    #[inline]
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Parses an action from its JSON form.
    ///
    /// Expects `{type, payload?, socket?}`; `bsock` is accepted in place of
    /// `socket`. A `null` designator counts as absent. Other top-level
    /// fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the value is not an object, `type` is not
    /// a string, or the designator does not match its kind.
    pub fn from_value(raw: Value) -> Result<Self> {
        let Value::Object(mut fields) = raw else {
            return Err(Error::config("action must be an object"));
        };

        let kind = match fields.shift_remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(Error::config("action type must be a string")),
        };

        let payload = fields.shift_remove("payload");

        let designator = match fields
            .shift_remove(DESIGNATOR_KEY)
            .or_else(|| fields.shift_remove(LEGACY_DESIGNATOR_KEY))
        {
            None | Some(Value::Null) => None,
            Some(raw) => Some(Designator::parse(&kind, raw)?),
        };

        Ok(Self {
            kind,
            payload,
            designator,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
