//! Socket Middleware - action-dispatch middleware for a multiplexed socket.
//!
//! This library connects an action/dispatch pipeline (Redux-style) to a
//! bidirectional socket connection.
//!
//! # Architecture
//!
//! The middleware sits between the host's `dispatch` and `next` stages:
//!
//! - **Inbound actions**: `CONNECT_SOCKET`, `DISCONNECT_SOCKET` and
//!   `EMIT_SOCKET` carrying a socket designator are consumed
//! - **Everything else**: forwarded unchanged to `next`
//! - **Server events**: translated into actions by declarative listeners
//!
//! Key design principles:
//!
//! - One socket per middleware, replaced on every connect
//! - Every callback captures the connection epoch and is inert once stale
//! - Inbound JSON is parsed once into typed designators, or rejected
//! - The transport is a trait; a websocket and an in-memory transport ship
//!   with the crate
//!
//! # Quick Start
//!
//! ```ignore
//! use socket_middleware::{Action, ConnectionConfig, ListenerSpec, OutboundCall, Result, SocketMiddleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let middleware = SocketMiddleware::builder()
//!         .listener(ListenerSpec::bind("block connect", "NEW_BLOCK"))
//!         .listener(ListenerSpec::hook("wallet tx", "NEW_TX", "ok"))
//!         .build(
//!             |action: Action| println!("dispatch {}", action.kind),
//!             |action: Action| println!("next {}", action.kind),
//!         )?;
//!
//!     middleware.handle(Action::connect_socket(
//!         ConnectionConfig::new("127.0.0.1", 18332).with_api_key("secret"),
//!     ));
//!
//!     // After SOCKET_CONNECTED has been dispatched:
//!     middleware.handle(Action::emit_socket(
//!         OutboundCall::new("get tip", serde_json::Value::Null)
//!             .acknowledge(|tip| println!("tip {tip}")),
//!     ));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`action`] | [`Action`], designators and action kinds |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Request IDs and connection epochs |
//! | [`middleware`] | [`SocketMiddleware`], builder and options |
//! | [`pipeline`] | `dispatch` / `next` sinks |
//! | [`protocol`] | Websocket packet format |
//! | [`transport`] | Transport traits, websocket and memory transports |

// ============================================================================
// Modules
// ============================================================================

/// Application actions and socket designators.
pub mod action;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// The socket middleware.
///
/// Use [`SocketMiddleware::builder()`] to create a configured instance.
pub mod middleware;

/// Hooks into the host's dispatch pipeline.
pub mod pipeline;

/// Websocket packet format.
pub mod protocol;

/// Socket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Action types
pub use action::{Acknowledge, Action, ConnectionConfig, Designator, OutboundCall, kinds};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Epoch, RequestId};

// Middleware types
pub use middleware::{
    ConnectionState, FailurePolicy, ListenerSpec, MiddlewareBuilder, MiddlewareOptions,
    SocketMiddleware, TransportErrorPolicy,
};

// Pipeline types
pub use pipeline::{ActionSink, Pipeline};

// Transport types
pub use transport::{
    Endpoint, LifecycleObservers, MemorySocket, MemoryTransport, SocketHandle, Transport,
    WsTransport,
};
