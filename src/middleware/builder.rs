//! Builder pattern for middleware configuration.
//!
//! # Example
//!
//! ```ignore
//! use socket_middleware::{FailurePolicy, ListenerSpec, MemoryTransport, SocketMiddleware};
//!
//! let middleware = SocketMiddleware::builder()
//!     .listener(ListenerSpec::bind("block connect", "NEW_BLOCK"))
//!     .call_failures(FailurePolicy::Report)
//!     .transport(MemoryTransport::new())
//!     .build(dispatch, next)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::action::Action;
use crate::error::{Error, Result};
use crate::pipeline::{ActionSink, Pipeline};
use crate::transport::{Transport, WsTransport};

use super::core::SocketMiddleware;
use super::options::{FailurePolicy, ListenerSpec, MiddlewareOptions, TransportErrorPolicy};

// ============================================================================
// MiddlewareBuilder
// ============================================================================

/// Builder for a [`SocketMiddleware`].
///
/// Use [`SocketMiddleware::builder()`] to create one.
#[derive(Default, Clone)]
pub struct MiddlewareBuilder {
    options: MiddlewareOptions,
    transport: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for MiddlewareBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareBuilder")
            .field("options", &self.options)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

impl MiddlewareBuilder {
    /// Creates a builder with default options and the websocket transport.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: MiddlewareOptions) -> Self {
        self.options = options;
        self
    }

    /// Appends a listener.
    #[inline]
    #[must_use]
    pub fn listener(mut self, listener: ListenerSpec) -> Self {
        self.options.listeners.push(listener);
        self
    }

    /// Appends several listeners.
    #[must_use]
    pub fn listeners(mut self, listeners: impl IntoIterator<Item = ListenerSpec>) -> Self {
        self.options.listeners.extend(listeners);
        self
    }

    /// Enables or disables diagnostics.
    #[inline]
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Sets the substitute for disconnect and error actions.
    #[inline]
    #[must_use]
    pub fn disconnected_action(mut self, action: Action) -> Self {
        self.options.disconnected_action = Some(action);
        self
    }

    /// Sets the policy for failed acknowledged calls.
    #[inline]
    #[must_use]
    pub fn call_failures(mut self, policy: FailurePolicy) -> Self {
        self.options.call_failures = policy;
        self
    }

    /// Sets the policy for a failed authentication call.
    #[inline]
    #[must_use]
    pub fn auth_failures(mut self, policy: FailurePolicy) -> Self {
        self.options.auth_failures = policy;
        self
    }

    /// Sets the effect of transport errors.
    #[inline]
    #[must_use]
    pub fn transport_errors(mut self, policy: TransportErrorPolicy) -> Self {
        self.options.transport_errors = policy;
        self
    }

    /// Sets the name of the authentication call.
    #[inline]
    #[must_use]
    pub fn auth_method(mut self, method: impl Into<String>) -> Self {
        self.options.auth_method = method.into();
        self
    }

    /// Uses `transport` instead of the websocket transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds the middleware around the host's `dispatch` and `next`.
    ///
    /// Listener specs are checked again when they are bound; an invalid one
    /// only disables itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the authentication method is empty or
    /// the disconnect substitute is itself a socket action.
    pub fn build(
        self,
        dispatch: impl ActionSink,
        next: impl ActionSink,
    ) -> Result<SocketMiddleware> {
        self.validate_auth_method()?;
        self.validate_disconnected_action()?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WsTransport::new()));

        debug!(
            listeners = self.options.listeners.len(),
            debug = self.options.debug,
            "Socket middleware built"
        );

        Ok(SocketMiddleware::new(
            transport,
            self.options,
            Pipeline::new(dispatch, next),
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl MiddlewareBuilder {
    fn validate_auth_method(&self) -> Result<()> {
        if self.options.auth_method.trim().is_empty() {
            return Err(Error::config(
                "Authentication method must not be empty.\n\
                 Example: SocketMiddleware::builder().auth_method(\"auth\")",
            ));
        }
        Ok(())
    }

    fn validate_disconnected_action(&self) -> Result<()> {
        if let Some(action) = &self.options.disconnected_action
            && action.designator().is_some()
        {
            return Err(Error::config(format!(
                "Disconnected action '{}' must not carry a socket designator",
                action.kind
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
