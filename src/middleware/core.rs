//! The socket middleware.
//!
//! [`SocketMiddleware`] sits in the host's dispatch pipeline. Every action
//! handed to [`SocketMiddleware::handle`] is either consumed as a socket
//! operation or forwarded unchanged to `next`.
//!
//! # Example
//!
//! ```ignore
//! use socket_middleware::{Action, ConnectionConfig, ListenerSpec, SocketMiddleware};
//!
//! let middleware = SocketMiddleware::builder()
//!     .listener(ListenerSpec::bind("block connect", "NEW_BLOCK"))
//!     .build(dispatch, next)?;
//!
//! middleware.handle(Action::connect_socket(ConnectionConfig::new("127.0.0.1", 18332)));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::action::{Action, Designator};
use crate::identifiers::Epoch;
use crate::pipeline::Pipeline;
use crate::transport::Transport;

use super::builder::MiddlewareBuilder;
use super::calls::CallDispatcher;
use super::connection::{ConnectionManager, ConnectionState};
use super::options::MiddlewareOptions;
use super::router::Route;

// ============================================================================
// SocketMiddleware
// ============================================================================

/// Action-dispatch middleware owning one socket.
pub struct SocketMiddleware {
    pipeline: Pipeline,
    options: Arc<MiddlewareOptions>,
    connection: ConnectionManager,
    calls: CallDispatcher,
}

impl fmt::Debug for SocketMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketMiddleware")
            .field("connection", &self.connection)
            .field("listeners", &self.options.listeners.len())
            .finish_non_exhaustive()
    }
}

impl SocketMiddleware {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> MiddlewareBuilder {
        MiddlewareBuilder::new()
    }

    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        options: MiddlewareOptions,
        pipeline: Pipeline,
    ) -> Self {
        let options = Arc::new(options);
        let connection =
            ConnectionManager::new(transport, Arc::clone(&options), pipeline.clone());
        let calls = CallDispatcher::new(Arc::clone(&options), pipeline.clone());

        Self {
            pipeline,
            options,
            connection,
            calls,
        }
    }

    /// Handles one action.
    ///
    /// Socket actions carrying a matching designator are consumed; every
    /// other action goes to `next` untouched. An emit without a connected
    /// socket is logged and also forwarded to `next`.
    pub fn handle(&self, action: Action) {
        match Route::of(&action) {
            Route::Passthrough => self.pipeline.next(action),
            Route::Connect => {
                if let Some(Designator::Connect(config)) = action.into_designator() {
                    self.connection.connect(config);
                }
            }
            Route::Disconnect => self.connection.disconnect(),
            Route::Emit => {
                let Some(live) = self.connection.live_socket() else {
                    warn!("Connect the socket before emitting");
                    self.pipeline.next(action);
                    return;
                };
                if let Some(Designator::Emit(call)) = action.into_designator() {
                    self.calls.emit(live, call);
                }
            }
        }
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Returns the current connection epoch.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.connection.epoch()
    }

    /// Returns `true` if the socket is authenticated.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the options in effect.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &MiddlewareOptions {
        &self.options
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tracing_subscriber::EnvFilter;

    use crate::action::{ConnectionConfig, OutboundCall, kinds};
    use crate::error::Error;
    use crate::middleware::options::{ListenerSpec, TransportErrorPolicy};
    use crate::transport::MemoryTransport;

    /// Installs a test subscriber; `RUST_LOG` overrides the filter.
    fn init_logging() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("socket_middleware=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }

    struct Harness {
        transport: MemoryTransport,
        middleware: SocketMiddleware,
        dispatched: mpsc::UnboundedReceiver<Action>,
        forwarded: mpsc::UnboundedReceiver<Action>,
    }

    fn harness(options: MiddlewareOptions) -> Harness {
        harness_with(MemoryTransport::new(), options)
    }

    fn harness_with(transport: MemoryTransport, options: MiddlewareOptions) -> Harness {
        let (dispatch_tx, dispatched) = mpsc::unbounded_channel();
        let (next_tx, forwarded) = mpsc::unbounded_channel();

        let middleware = SocketMiddleware::builder()
            .options(options)
            .transport(transport.clone())
            .build(
                move |action: Action| {
                    let _ = dispatch_tx.send(action);
                },
                move |action: Action| {
                    let _ = next_tx.send(action);
                },
            )
            .expect("build");

        Harness {
            transport,
            middleware,
            dispatched,
            forwarded,
        }
    }

    impl Harness {
        async fn connect(&mut self) {
            self.middleware
                .handle(Action::connect_socket(ConnectionConfig::new("localhost", 8000)));
            self.transport.last_socket().expect("socket").open();
            let action = self.dispatched.recv().await.expect("connected");
            assert!(action.is(kinds::SOCKET_CONNECTED));
        }
    }

    #[tokio::test]
    async fn test_passthrough_is_identity() {
        let mut h = harness(MiddlewareOptions::new());

        let text = "payload".to_string();
        let ptr = text.as_ptr();
        h.middleware
            .handle(Action::with_payload("ADD_TODO", Value::String(text)));

        let forwarded = h.forwarded.try_recv().expect("forwarded");
        assert!(forwarded.is("ADD_TODO"));
        let Some(Value::String(out)) = forwarded.payload else {
            panic!("payload changed");
        };
        assert_eq!(out.as_ptr(), ptr);
        assert!(h.dispatched.try_recv().is_err());
        assert_eq!(h.transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_lifecycle() {
        let mut h = harness(MiddlewareOptions::new());

        h.middleware
            .handle(Action::connect_socket(ConnectionConfig::new("localhost", 8000)));
        assert_eq!(h.middleware.state(), ConnectionState::Connecting);

        let socket = h.transport.last_socket().expect("socket");
        assert_eq!(socket.endpoint().port, 8000);

        socket.open();
        assert!(h.dispatched.recv().await.expect("action").is(kinds::SOCKET_CONNECTED));
        assert!(h.middleware.is_connected());
        assert!(h.forwarded.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_before_connect_is_forwarded() {
        let mut h = harness(MiddlewareOptions::new());

        h.middleware
            .handle(Action::emit_socket(OutboundCall::new("watch", "x")));

        let forwarded = h.forwarded.try_recv().expect("forwarded");
        assert!(forwarded.is(kinds::EMIT_SOCKET));
        assert!(h.dispatched.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_while_connecting_is_forwarded() {
        let mut h = harness(MiddlewareOptions::new());

        h.middleware
            .handle(Action::connect_socket(ConnectionConfig::new("localhost", 1)));
        h.middleware
            .handle(Action::emit_socket(OutboundCall::new("watch", "x")));

        assert!(h.forwarded.try_recv().expect("forwarded").is(kinds::EMIT_SOCKET));
        assert!(h.transport.last_socket().expect("socket").fired().is_empty());
    }

    #[tokio::test]
    async fn test_emit_fires_on_connected_socket() {
        let mut h = harness(MiddlewareOptions::new());
        h.connect().await;

        h.middleware
            .handle(Action::emit_socket(OutboundCall::new("watch", "x").arg(2)));

        let fired = h.transport.last_socket().expect("socket").fired();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].args, vec![json!("x"), json!(2)]);
        assert!(h.forwarded.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listeners_bound_once_per_connection() {
        let options = MiddlewareOptions::new()
            .with_listener(ListenerSpec::bind("block", "NEW_BLOCK"))
            .with_listener(ListenerSpec::hook("tx", "NEW_TX", "ack"));
        let mut h = harness(options);
        h.connect().await;

        let socket = h.transport.last_socket().expect("socket");
        assert_eq!(socket.bind_count("block"), 1);
        assert!(socket.has_hook("tx"));

        socket.deliver("block", vec![json!(5)]);
        let action = h.dispatched.recv().await.expect("event");
        assert!(action.is("NEW_BLOCK"));
        assert_eq!(action.payload, Some(json!([5])));

        let ack = socket.request("tx", Some(json!("deadbeef"))).await;
        assert_eq!(ack, Some(Bytes::from_static(b"ack")));
        assert!(h.dispatched.recv().await.expect("hook").is("NEW_TX"));
    }

    #[tokio::test]
    async fn test_reconnect_closes_old_socket_and_ignores_its_events() {
        let options = MiddlewareOptions::new().with_listener(ListenerSpec::bind("block", "NEW_BLOCK"));
        let mut h = harness(options);
        h.connect().await;
        let first = h.transport.last_socket().expect("socket");

        h.middleware
            .handle(Action::connect_socket(ConnectionConfig::new("localhost", 9000)));
        assert_eq!(first.close_count(), 1);

        first.open();
        first.fail(Error::ConnectionClosed);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(h.dispatched.try_recv().is_err());
        assert_eq!(h.middleware.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_disconnect_dispatches_or_substitutes() {
        let mut h = harness(MiddlewareOptions::new());
        h.connect().await;

        h.middleware.handle(Action::disconnect_socket());
        assert!(h.dispatched.recv().await.expect("action").is(kinds::SOCKET_DISCONNECTED));
        assert!(h.transport.last_socket().expect("socket").is_closed());
        assert_eq!(h.middleware.state(), ConnectionState::Disconnected);

        let mut h = harness(MiddlewareOptions::new().with_disconnected_action(Action::new("OFFLINE")));
        h.middleware.handle(Action::disconnect_socket());
        assert!(h.forwarded.try_recv().expect("substitute").is("OFFLINE"));
        assert!(h.dispatched.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transport_error_retains_socket_by_default() {
        let mut h = harness(MiddlewareOptions::new());
        h.connect().await;

        h.transport
            .last_socket()
            .expect("socket")
            .fail(Error::ConnectionClosed);

        let action = h.dispatched.recv().await.expect("error");
        assert!(action.is(kinds::SOCKET_ERROR));
        assert_eq!(action.payload, Some(json!("Connection closed")));
        assert!(h.middleware.is_connected());
    }

    #[tokio::test]
    async fn test_transport_error_reset_policy() {
        let options = MiddlewareOptions::new()
            .with_transport_errors(TransportErrorPolicy::Reset)
            .with_disconnected_action(Action::new("OFFLINE"));
        let mut h = harness(options);
        h.connect().await;

        h.transport
            .last_socket()
            .expect("socket")
            .fail(Error::ConnectionClosed);

        assert!(h.forwarded.try_recv().expect("substitute").is("OFFLINE"));
        assert_eq!(h.middleware.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_debug_diagnostics_keep_routing_intact() {
        init_logging();

        let options = MiddlewareOptions::new()
            .with_debug(true)
            .with_listener(ListenerSpec::bind("block", "NEW_BLOCK"))
            .with_listener(ListenerSpec::bind("", "BROKEN"));
        let mut h = harness(options);
        h.connect().await;

        let socket = h.transport.last_socket().expect("socket");
        socket.deliver("block", vec![json!(1)]);
        socket.deliver("block", vec![json!(2)]);

        let first = h.dispatched.recv().await.expect("first");
        let second = h.dispatched.recv().await.expect("second");
        assert_eq!(first.payload, Some(json!([1])));
        assert_eq!(second.payload, Some(json!([2])));
    }

    #[tokio::test]
    async fn test_acknowledged_emit_round_trip() {
        let transport = MemoryTransport::new().with_responder(|method, args| match method {
            "echo" => Ok(args[0].clone()),
            _ => Ok(Value::Null),
        });
        let mut h = harness_with(transport, MiddlewareOptions::new());
        h.connect().await;

        let (tx, mut replies) = mpsc::unbounded_channel();
        let call = OutboundCall::new("echo", json!({ "n": 1 })).acknowledge(move |reply| {
            let _ = tx.send(reply);
        });
        h.middleware.handle(Action::emit_socket(call));

        assert_eq!(replies.recv().await, Some(json!({ "n": 1 })));
    }
}
