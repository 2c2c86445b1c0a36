//! Socket middleware module.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SocketMiddleware`] | Routes actions to the socket or to `next` |
//! | [`MiddlewareBuilder`] | Fluent configuration builder |
//! | [`MiddlewareOptions`] | Listeners, diagnostics and failure policies |
//! | [`ListenerSpec`] | Inbound event to action mapping |
//! | [`ConnectionState`] | State of the connection slot |
//!
//! # Failure Reporting
//!
//! Transport errors, and call or authentication failures under
//! [`FailurePolicy::Report`], are reported the same way: the configured
//! disconnect substitute is forwarded to `next`, or `SOCKET_ERROR` is
//! dispatched with the error message as payload.

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for middleware configuration.
pub mod builder;

/// Outbound emits.
mod calls;

/// Connection slot management.
pub mod connection;

/// Middleware entry point.
pub mod core;

/// Inbound listener registration.
mod listeners;

/// Options and listener specs.
pub mod options;

/// Action classification.
mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::MiddlewareBuilder;
pub use connection::ConnectionState;
pub use core::SocketMiddleware;
pub use options::{
    DEFAULT_AUTH_METHOD, FailurePolicy, ListenerSpec, MiddlewareOptions, TransportErrorPolicy,
};

// ============================================================================
// Imports
// ============================================================================

use crate::action::Action;
use crate::error::Error;
use crate::pipeline::Pipeline;

/// Reports `error` to the host.
pub(crate) fn report_error(options: &MiddlewareOptions, pipeline: &Pipeline, error: &Error) {
    match &options.disconnected_action {
        Some(substitute) => pipeline.next(substitute.clone()),
        None => pipeline.dispatch(Action::socket_error(error)),
    }
}
