//! Socket designators carried by actions.
//!
//! A designator marks an action as relevant to the middleware and carries
//! the parameters of the requested socket operation. Each action kind has
//! its own variant so the router never inspects untyped fields.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::transport::Endpoint;

use super::kinds;

// ============================================================================
// Constants
// ============================================================================

/// Default host when a connect designator omits it.
const DEFAULT_HOST: &str = "localhost";

/// Designator key naming the call type.
const CALL_TYPE_KEY: &str = "type";

/// Designator key naming the call message.
const MESSAGE_KEY: &str = "message";

/// Designator key naming the acknowledge continuation.
const ACKNOWLEDGE_KEY: &str = "acknowledge";

// ============================================================================
// Designator
// ============================================================================

/// Mode-specific parameters of a socket action.
#[derive(Debug, Clone)]
pub enum Designator {
    /// Open (or replace) the connection.
    Connect(ConnectionConfig),
    /// Close the connection.
    Disconnect,
    /// Send a fire-and-forget event or an acknowledged call.
    Emit(OutboundCall),
    /// Designator attached to an action kind the middleware does not handle.
    Other(Value),
}

impl Designator {
    /// Parses a raw designator for the given action kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a connect or emit designator is malformed.
    pub fn parse(kind: &str, raw: Value) -> Result<Self> {
        match kind {
            kinds::CONNECT_SOCKET => ConnectionConfig::from_value(raw).map(Self::Connect),
            kinds::DISCONNECT_SOCKET => Ok(Self::Disconnect),
            kinds::EMIT_SOCKET => OutboundCall::from_value(raw).map(Self::Emit),
            _ => Ok(Self::Other(raw)),
        }
    }
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Parameters of a connection attempt.
///
/// Immutable once handed to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server port.
    pub port: u16,
    /// Server host.
    pub host: String,
    /// Connect over TLS.
    pub use_tls: bool,
    /// Websocket subprotocols offered in the handshake.
    pub subprotocols: Vec<String>,
    /// Namespace (path) on the server.
    pub namespace: Option<String>,
    /// Key sent with the authentication call.
    pub api_key: Option<String>,
}

/// Wire shape of a connect designator.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionConfigRepr {
    port: u16,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    ssl: bool,
    #[serde(default)]
    protocols: Option<ProtocolsRepr>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProtocolsRepr {
    One(String),
    Many(Vec<String>),
}

impl ConnectionConfig {
    /// Creates a plain-text connection config for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            port,
            host: host.into(),
            use_tls: false,
            subprotocols: Vec::new(),
            namespace: None,
            api_key: None,
        }
    }

    /// Enables TLS.
    #[inline]
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    /// Adds a websocket subprotocol.
    #[inline]
    #[must_use]
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Sets the namespace.
    #[inline]
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the key sent with the authentication call.
    #[inline]
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Parses a connect designator.
    ///
    /// Accepts `{port, host, ssl, protocols, namespace, apiKey}` where
    /// `protocols` is a string or a list of strings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the designator does not match the shape.
    pub fn from_value(raw: Value) -> Result<Self> {
        let repr: ConnectionConfigRepr = serde_json::from_value(raw)
            .map_err(|e| Error::config(format!("invalid connect designator: {e}")))?;

        let subprotocols = match repr.protocols {
            None => Vec::new(),
            Some(ProtocolsRepr::One(protocol)) => vec![protocol],
            Some(ProtocolsRepr::Many(protocols)) => protocols,
        };

        Ok(Self {
            port: repr.port,
            host: repr.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            use_tls: repr.ssl,
            subprotocols,
            namespace: repr.namespace,
            api_key: repr.api_key,
        })
    }

    /// Returns the transport endpoint for this config.
    ///
    /// The API key is not part of the endpoint; it travels in the
    /// authentication call.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.use_tls,
            subprotocols: self.subprotocols.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

// ============================================================================
// Acknowledge
// ============================================================================

/// Continuation invoked with the reply of an acknowledged call.
#[derive(Clone)]
pub struct Acknowledge(Arc<dyn Fn(Value) + Send + Sync>);

impl Acknowledge {
    /// Wraps a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    /// Invokes the callback with the peer's reply.
    #[inline]
    pub fn invoke(&self, reply: Value) {
        (self.0)(reply);
    }
}

impl fmt::Debug for Acknowledge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Acknowledge(..)")
    }
}

// ============================================================================
// OutboundCall
// ============================================================================

/// An outbound event or call built from an `EMIT_SOCKET` action.
///
/// The transport receives `message` followed by `extra_args` as
/// positional arguments, in that order.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    /// Event or method name on the peer.
    pub call_type: String,
    /// First positional argument.
    pub message: Value,
    /// Remaining positional arguments, in declaration order.
    pub extra_args: Vec<Value>,
    /// Reply continuation; `None` sends a one-way fire.
    pub acknowledge: Option<Acknowledge>,
}

impl OutboundCall {
    /// Creates a one-way call with a message.
    #[must_use]
    pub fn new(call_type: impl Into<String>, message: impl Into<Value>) -> Self {
        Self {
            call_type: call_type.into(),
            message: message.into(),
            extra_args: Vec::new(),
            acknowledge: None,
        }
    }

    /// Appends an extra positional argument.
    #[inline]
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.extra_args.push(value.into());
        self
    }

    /// Sets the reply continuation, turning the fire into a call.
    #[inline]
    #[must_use]
    pub fn acknowledge<F>(mut self, callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.acknowledge = Some(Acknowledge::new(callback));
        self
    }

    /// Returns `true` if a reply is awaited.
    #[inline]
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledge.is_some()
    }

    /// Returns the positional arguments sent to the transport.
    #[must_use]
    pub fn args(&self) -> Vec<Value> {
        let mut args = Vec::with_capacity(1 + self.extra_args.len());
        args.push(self.message.clone());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Parses an emit designator.
    ///
    /// Fields other than `type`, `message` and `acknowledge` become extra
    /// arguments in the order they appear in the object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the designator is not an object, `type`
    /// is not a string, or `acknowledge` is present (a JSON value is never
    /// invocable; attach continuations with [`OutboundCall::acknowledge`]).
    pub fn from_value(raw: Value) -> Result<Self> {
        let Value::Object(mut fields) = raw else {
            return Err(Error::config("emit designator must be an object"));
        };

        let call_type = match fields.shift_remove(CALL_TYPE_KEY) {
            Some(Value::String(call_type)) if !call_type.is_empty() => call_type,
            _ => return Err(Error::config("emit designator needs a string 'type'")),
        };

        if fields.contains_key(ACKNOWLEDGE_KEY) {
            return Err(Error::config("acknowledge property must be a function"));
        }

        let message = fields.shift_remove(MESSAGE_KEY).unwrap_or(Value::Null);

        Ok(Self {
            call_type,
            message,
            extra_args: into_ordered_values(fields),
            acknowledge: None,
        })
    }
}

/// Collects map values in insertion order.
fn into_ordered_values(fields: Map<String, Value>) -> Vec<Value> {
    fields.into_iter().map(|(_, value)| value).collect()
}

// ============================================================================
// Tests
// ============================================================================
