//! Middleware options and listener specifications.
//!
//! Options can be assembled in code:
//!
//! ```ignore
//! use socket_middleware::{Action, ListenerSpec, MiddlewareOptions};
//!
//! let options = MiddlewareOptions::new()
//!     .with_listener(ListenerSpec::bind("block connect", "NEW_BLOCK"))
//!     .with_listener(ListenerSpec::hook("wallet tx", "NEW_TX", "ok"))
//!     .with_disconnected_action(Action::new("OFFLINE"))
//!     .with_debug(true);
//! ```
//!
//! or parsed from JSON with [`MiddlewareOptions::from_value`]:
//!
//! ```json
//! {
//!   "listeners": [{ "event": "block connect", "actionType": "NEW_BLOCK" }],
//!   "debug": true,
//!   "disconnectedAction": { "type": "OFFLINE" },
//!   "callFailures": "report",
//!   "transportErrors": "reset"
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::action::Action;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Name of the authentication call made after every handshake.
pub const DEFAULT_AUTH_METHOD: &str = "auth";

// ============================================================================
// Policies
// ============================================================================

/// What to do when an acknowledged call or the authentication call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure and carry on; nothing is dispatched.
    #[default]
    Swallow,
    /// Report the failure like a transport error (`SOCKET_ERROR` or the
    /// disconnect substitute).
    Report,
}

/// What a transport error does to the connection slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorPolicy {
    /// Keep the socket and the current state; a later connect or
    /// disconnect cleans up.
    #[default]
    Retain,
    /// Close the socket and move to `Disconnected`.
    Reset,
}

// ============================================================================
// ListenerSpec
// ============================================================================

/// Declares how an inbound server event becomes an application action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    /// Server event name.
    pub event: String,
    /// Kind of the dispatched action.
    pub action_type: String,
    /// Acknowledgment returned to the server; `Some` makes this a hook.
    pub ack: Option<Bytes>,
}

/// Wire shape of a listener spec.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenerSpecRepr {
    event: String,
    action_type: String,
    #[serde(default)]
    ack: Option<AckRepr>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AckRepr {
    Text(String),
    Raw(Vec<u8>),
}

impl ListenerSpec {
    /// Creates a fire-and-forget listener.
    #[must_use]
    pub fn bind(event: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            action_type: action_type.into(),
            ack: None,
        }
    }

    /// Creates an acknowledging listener.
    #[must_use]
    pub fn hook(
        event: impl Into<String>,
        action_type: impl Into<String>,
        ack: impl Into<Bytes>,
    ) -> Self {
        Self {
            event: event.into(),
            action_type: action_type.into(),
            ack: Some(ack.into()),
        }
    }

    /// Returns `true` if the listener acknowledges the server.
    #[inline]
    #[must_use]
    pub fn is_hook(&self) -> bool {
        self.ack.is_some()
    }

    /// Checks that event name and action type are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either is empty.
    pub fn validate(&self) -> Result<()> {
        if self.event.is_empty() {
            return Err(Error::config("Event listener was not a string"));
        }
        if self.action_type.is_empty() {
            return Err(Error::config("Need an action type to create the action"));
        }
        Ok(())
    }

    /// Parses `{event, actionType, ack?}`.
    ///
    /// `ack` may be a string (its UTF-8 bytes) or an array of bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the shape does not match or validation
    /// fails.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let repr = ListenerSpecRepr::deserialize(raw)
            .map_err(|e| Error::config(format!("invalid listener: {e}")))?;

        let spec = Self {
            event: repr.event,
            action_type: repr.action_type,
            ack: repr.ack.map(|ack| match ack {
                AckRepr::Text(text) => Bytes::from(text),
                AckRepr::Raw(raw) => Bytes::from(raw),
            }),
        };

        spec.validate()?;
        Ok(spec)
    }
}

// ============================================================================
// MiddlewareOptions
// ============================================================================

/// Middleware configuration.
#[derive(Debug, Clone)]
pub struct MiddlewareOptions {
    /// Listeners bound on every successful connection, in order.
    pub listeners: Vec<ListenerSpec>,

    /// Log connect, bind and error diagnostics.
    pub debug: bool,

    /// Forwarded instead of `SOCKET_DISCONNECTED` and `SOCKET_ERROR`.
    pub disconnected_action: Option<Action>,

    /// Handling of failed acknowledged calls.
    pub call_failures: FailurePolicy,

    /// Handling of a failed authentication call.
    pub auth_failures: FailurePolicy,

    /// Effect of transport errors on the connection slot.
    pub transport_errors: TransportErrorPolicy,

    /// Name of the authentication call.
    pub auth_method: String,
}

impl Default for MiddlewareOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire shape of the scalar options.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsRepr {
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    call_failures: FailurePolicy,
    #[serde(default)]
    auth_failures: FailurePolicy,
    #[serde(default)]
    transport_errors: TransportErrorPolicy,
    #[serde(default)]
    auth_method: Option<String>,
}

impl MiddlewareOptions {
    /// Creates options with no listeners and reference behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            debug: false,
            disconnected_action: None,
            call_failures: FailurePolicy::Swallow,
            auth_failures: FailurePolicy::Swallow,
            transport_errors: TransportErrorPolicy::Retain,
            auth_method: DEFAULT_AUTH_METHOD.to_string(),
        }
    }

    /// Appends a listener.
    #[inline]
    #[must_use]
    pub fn with_listener(mut self, listener: ListenerSpec) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Enables or disables diagnostics.
    #[inline]
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the substitute for disconnect and error actions.
    #[inline]
    #[must_use]
    pub fn with_disconnected_action(mut self, action: Action) -> Self {
        self.disconnected_action = Some(action);
        self
    }

    /// Sets the policy for failed acknowledged calls.
    #[inline]
    #[must_use]
    pub fn with_call_failures(mut self, policy: FailurePolicy) -> Self {
        self.call_failures = policy;
        self
    }

    /// Sets the policy for a failed authentication call.
    #[inline]
    #[must_use]
    pub fn with_auth_failures(mut self, policy: FailurePolicy) -> Self {
        self.auth_failures = policy;
        self
    }

    /// Sets the effect of transport errors.
    #[inline]
    #[must_use]
    pub fn with_transport_errors(mut self, policy: TransportErrorPolicy) -> Self {
        self.transport_errors = policy;
        self
    }

    /// Sets the name of the authentication call.
    #[inline]
    #[must_use]
    pub fn with_auth_method(mut self, method: impl Into<String>) -> Self {
        self.auth_method = method.into();
        self
    }

    /// Parses options from JSON.
    ///
    /// A malformed listener is logged and skipped; the remaining listeners
    /// are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the value is not an object, a scalar
    /// option has the wrong type, `listeners` is not an array, or
    /// `disconnectedAction` is not a valid action.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let Value::Object(fields) = raw else {
            return Err(Error::config("middleware options must be an object"));
        };

        let repr = OptionsRepr::deserialize(raw)
            .map_err(|e| Error::config(format!("invalid middleware options: {e}")))?;

        let listeners = match fields.get("listeners") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .filter_map(|(index, entry)| match ListenerSpec::from_value(entry) {
                    Ok(spec) => Some(spec),
                    Err(e) => {
                        warn!(index, error = %e, "Skipping listener");
                        None
                    }
                })
                .collect(),
            Some(_) => return Err(Error::config("listeners must be an array")),
        };

        let disconnected_action = match fields.get("disconnectedAction") {
            None | Some(Value::Null) => None,
            Some(action) => Some(Action::from_value(action.clone())?),
        };

        Ok(Self {
            listeners,
            debug: repr.debug,
            disconnected_action,
            call_failures: repr.call_failures,
            auth_failures: repr.auth_failures,
            transport_errors: repr.transport_errors,
            auth_method: repr
                .auth_method
                .unwrap_or_else(|| DEFAULT_AUTH_METHOD.to_string()),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
