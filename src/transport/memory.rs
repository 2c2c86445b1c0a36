//! In-process transport.
//!
//! [`MemoryTransport`] implements the transport contract without any I/O.
//! The host plays the server: it completes handshakes, injects errors,
//! delivers events, calls hooks, and decides how calls are answered.
//!
//! # Example
//!
//! ```ignore
//! let transport = MemoryTransport::new()
//!     .with_responder(|method, _args| match method {
//!         "ping" => Ok(json!("pong")),
//!         _ => Ok(Value::Null),
//!     });
//!
//! let socket = transport.last_socket().expect("connected");
//! socket.open();
//! socket.deliver("block", vec![json!(1)]);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};

use super::{
    BindHandler, Endpoint, HandlerTable, HookHandler, LifecycleObservers, SocketHandle, Transport,
};

// ============================================================================
// Types
// ============================================================================

/// Answers calls made on memory sockets.
pub type Responder = Arc<dyn Fn(&str, &[Value]) -> Result<Value> + Send + Sync>;

/// A recorded outbound call or fire.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    /// Method or event name.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// Transport whose sockets live in process memory.
///
/// Cloning shares the same socket list and responder. Every socket it
/// creates stays in that list after it is closed so it can be inspected;
/// it is freed only with the last clone of the transport.
#[derive(Clone)]
pub struct MemoryTransport {
    sockets: Arc<Mutex<Vec<Arc<MemorySocket>>>>,
    responder: Arc<RwLock<Responder>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("sockets", &self.sockets.lock().len())
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// Creates a transport that answers every call with `null`.
    #[must_use]
    pub fn new() -> Self {
        let responder: Responder = Arc::new(|_, _| Ok(Value::Null));
        Self {
            sockets: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(RwLock::new(responder)),
        }
    }

    /// Sets the call responder.
    #[must_use]
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.set_responder(responder);
        self
    }

    /// Replaces the call responder; affects existing sockets too.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        *self.responder.write() = Arc::new(responder);
    }

    /// Returns every socket created so far, oldest first.
    #[must_use]
    pub fn sockets(&self) -> Vec<Arc<MemorySocket>> {
        self.sockets.lock().clone()
    }

    /// Returns the most recently created socket.
    #[must_use]
    pub fn last_socket(&self) -> Option<Arc<MemorySocket>> {
        self.sockets.lock().last().cloned()
    }

    /// Returns the number of sockets created so far.
    #[inline]
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.sockets.lock().len()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, endpoint: &Endpoint, observers: LifecycleObservers) -> Arc<dyn SocketHandle> {
        let socket = Arc::new(MemorySocket {
            endpoint: endpoint.clone(),
            observers,
            responder: Arc::clone(&self.responder),
            handlers: RwLock::new(HandlerTable::default()),
            close_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            fired: Mutex::new(Vec::new()),
        });

        self.sockets.lock().push(Arc::clone(&socket));
        trace!(host = %endpoint.host, port = endpoint.port, "Memory socket created");

        socket
    }
}

// ============================================================================
// MemorySocket
// ============================================================================

/// One socket of a [`MemoryTransport`].
pub struct MemorySocket {
    endpoint: Endpoint,
    observers: LifecycleObservers,
    responder: Arc<RwLock<Responder>>,
    handlers: RwLock<HandlerTable>,
    close_count: AtomicUsize,
    calls: Mutex<Vec<Sent>>,
    fired: Mutex<Vec<Sent>>,
}

impl fmt::Debug for MemorySocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySocket")
            .field("endpoint", &self.endpoint)
            .field("close_count", &self.close_count())
            .finish_non_exhaustive()
    }
}

impl MemorySocket {
    /// Returns the endpoint the socket was opened for.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Completes the handshake, firing the connect observer.
    pub fn open(&self) {
        (self.observers.on_connect)();
    }

    /// Reports a transport failure through the error observer.
    pub fn fail(&self, error: Error) {
        (self.observers.on_error)(error);
    }

    /// Delivers an inbound one-way event to the bind handlers.
    ///
    /// Returns the number of handlers that ran.
    pub fn deliver(&self, event: &str, args: Vec<Value>) -> usize {
        let handlers = self.handlers.read().binds_for(event);
        for handler in &handlers {
            handler(args.clone());
        }
        handlers.len()
    }

    /// Makes an inbound call, returning the hook's acknowledgment.
    ///
    /// Returns `None` if no hook is registered for `event`.
    pub async fn request(&self, event: &str, payload: Option<Value>) -> Option<Bytes> {
        let hook = self.handlers.read().hook_for(event)?;
        Some(hook(payload).await)
    }

    /// Returns how many times `close` was called.
    #[inline]
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::Acquire)
    }

    /// Returns `true` once the socket has been closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Returns the number of bind handlers for `event`.
    #[must_use]
    pub fn bind_count(&self, event: &str) -> usize {
        self.handlers.read().bind_count(event)
    }

    /// Returns `true` if a hook answers `event`.
    #[must_use]
    pub fn has_hook(&self, event: &str) -> bool {
        self.handlers.read().has_hook(event)
    }

    /// Returns the calls made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Sent> {
        self.calls.lock().clone()
    }

    /// Returns the fires sent so far.
    #[must_use]
    pub fn fired(&self) -> Vec<Sent> {
        self.fired.lock().clone()
    }
}

#[async_trait]
impl SocketHandle for MemorySocket {
    fn bind(&self, event: &str, handler: BindHandler) {
        self.handlers.write().bind(event, handler);
    }

    fn hook(&self, event: &str, handler: HookHandler) {
        self.handlers.write().hook(event, handler);
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        self.calls.lock().push(Sent {
            method: method.to_string(),
            args: args.clone(),
        });

        // Replies never arrive synchronously on a real socket.
        tokio::task::yield_now().await;

        let responder = Arc::clone(&*self.responder.read());
        responder(method, &args)
    }

    fn fire(&self, method: &str, args: Vec<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        self.fired.lock().push(Sent {
            method: method.to_string(),
            args,
        });
        Ok(())
    }

    fn close(&self) {
        self.close_count.fetch_add(1, Ordering::AcqRel);
        self.handlers.write().clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::FutureExt;
    use serde_json::json;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "localhost".to_string(),
            port: 1,
            use_tls: false,
            subprotocols: Vec::new(),
            namespace: None,
        }
    }

    #[tokio::test]
    async fn test_responder_answers_calls() {
        let transport = MemoryTransport::new().with_responder(|method, args| {
            assert_eq!(args, &[json!(1)]);
            Ok(json!(format!("{method}-reply")))
        });
        let socket = transport.connect(&endpoint(), LifecycleObservers::noop());

        let reply = socket.call("ping", vec![json!(1)]).await.expect("reply");
        assert_eq!(reply, json!("ping-reply"));

        let memory = transport.last_socket().expect("socket");
        assert_eq!(memory.calls()[0].method, "ping");
    }

    #[tokio::test]
    async fn test_closed_socket_rejects_traffic() {
        let transport = MemoryTransport::new();
        let socket = transport.connect(&endpoint(), LifecycleObservers::noop());
        socket.bind("a", Arc::new(|_| {}));
        socket.close();

        let memory = transport.last_socket().expect("socket");
        assert_eq!(memory.close_count(), 1);
        assert_eq!(memory.bind_count("a"), 0);
        assert!(socket.fire("x", Vec::new()).is_err());
        assert!(socket.call("x", Vec::new()).await.is_err());
    }

    #[test]
    fn test_closed_sockets_stay_listed() {
        let transport = MemoryTransport::new();
        let first = transport.connect(&endpoint(), LifecycleObservers::noop());
        first.close();
        drop(first);
        transport.connect(&endpoint(), LifecycleObservers::noop());

        let sockets = transport.sockets();
        assert_eq!(sockets.len(), 2);
        assert!(sockets[0].is_closed());
        assert!(!sockets[1].is_closed());
    }

    #[tokio::test]
    async fn test_deliver_and_request() {
        let transport = MemoryTransport::new();
        let socket = transport.connect(&endpoint(), LifecycleObservers::noop());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        socket.bind("evt", Arc::new(move |args| sink.lock().push(args)));
        socket.hook("ask", Arc::new(|_| async { Bytes::from_static(b"yes") }.boxed()));

        let memory = transport.last_socket().expect("socket");
        assert_eq!(memory.deliver("evt", vec![json!(1), json!(2)]), 1);
        assert_eq!(memory.deliver("other", Vec::new()), 0);
        assert_eq!(*seen.lock(), vec![vec![json!(1), json!(2)]]);

        assert_eq!(
            memory.request("ask", None).await,
            Some(Bytes::from_static(b"yes"))
        );
        assert_eq!(memory.request("missing", None).await, None);
    }

    #[test]
    fn test_observers_fire_on_demand() {
        let hits = Arc::new(AtomicUsize::new(0));
        let on_connect = Arc::clone(&hits);
        let on_error = Arc::clone(&hits);
        let observers = LifecycleObservers {
            on_connect: Box::new(move || {
                on_connect.fetch_add(1, Ordering::SeqCst);
            }),
            on_error: Box::new(move |_| {
                on_error.fetch_add(10, Ordering::SeqCst);
            }),
        };

        let transport = MemoryTransport::new();
        let _socket = transport.connect(&endpoint(), observers);
        let memory = transport.last_socket().expect("socket");

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        memory.open();
        memory.fail(Error::ConnectionClosed);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }
}
