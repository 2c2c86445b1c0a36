//! Socket transport layer.
//!
//! The middleware drives the transport through two traits:
//!
//! - [`Transport`] opens a socket for an [`Endpoint`]
//! - [`SocketHandle`] is one open (or opening) socket
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐                          ┌─────────────────┐
//! │  SocketMiddleware  │                          │  Server         │
//! │                    │   call / fire / ack      │                 │
//! │  ConnectionManager │◄────────────────────────►│  bind / hook    │
//! │  → SocketHandle    │     ws[s]://host:port    │  handlers       │
//! └────────────────────┘                          └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Transport::connect` - returns a handle immediately, I/O starts in the background
//! 2. `on_connect` observer - fired once the handshake completes
//! 3. `bind` / `hook` / `call` / `fire` - traffic on the open socket
//! 4. `on_error` observer - fired on transport failure
//! 5. `SocketHandle::close` - immediate close, handlers discarded
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handlers` | Inbound handler table shared by the transports |
//! | `memory` | In-process transport for tests and embedding |
//! | `ws` | Websocket transport over `tokio-tungstenite` |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound handler table.
mod handlers;

/// In-process transport.
pub mod memory;

/// Websocket transport.
pub mod ws;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

pub(crate) use handlers::HandlerTable;
pub use memory::{MemorySocket, MemoryTransport};
pub use ws::WsTransport;

// ============================================================================
// Callback Types
// ============================================================================

/// Called once when the socket handshake completes.
pub type ConnectObserver = Box<dyn Fn() + Send + Sync>;

/// Called for every transport failure.
pub type ErrorObserver = Box<dyn Fn(Error) + Send + Sync>;

/// Handler for an inbound one-way event; receives the positional arguments.
pub type BindHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Handler for an inbound call; receives the payload and resolves to the
/// acknowledgment sent back to the peer.
pub type HookHandler = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Bytes> + Send + Sync>;

// ============================================================================
// LifecycleObservers
// ============================================================================

/// Observers registered with a socket before it performs any I/O.
pub struct LifecycleObservers {
    /// Handshake completed.
    pub on_connect: ConnectObserver,
    /// Transport failure.
    pub on_error: ErrorObserver,
}

impl LifecycleObservers {
    /// Observers that ignore every notification.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            on_connect: Box::new(|| {}),
            on_error: Box::new(|_| {}),
        }
    }
}

impl fmt::Debug for LifecycleObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleObservers").finish_non_exhaustive()
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Where and how to open a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Use TLS (`wss`).
    pub use_tls: bool,
    /// Websocket subprotocols.
    pub subprotocols: Vec<String>,
    /// Namespace, used as the URL path.
    pub namespace: Option<String>,
}

impl Endpoint {
    /// Returns the websocket URL.
    ///
    /// Format: `ws[s]://{host}:{port}/{namespace}`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the host is not valid in a URL.
    pub fn url(&self) -> Result<Url> {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}", self.host, self.port))?;

        if let Some(namespace) = &self.namespace {
            url.set_path(namespace.trim_start_matches('/'));
        }

        Ok(url)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Opens sockets.
///
/// `connect` must return without invoking either observer; the handshake
/// and all later notifications happen asynchronously.
pub trait Transport: Send + Sync + 'static {
    /// Starts opening a socket to `endpoint`.
    fn connect(&self, endpoint: &Endpoint, observers: LifecycleObservers) -> Arc<dyn SocketHandle>;
}

// ============================================================================
// SocketHandle
// ============================================================================

/// One socket created by a [`Transport`].
#[async_trait]
pub trait SocketHandle: Send + Sync + 'static {
    /// Registers a handler for inbound one-way events named `event`.
    fn bind(&self, event: &str, handler: BindHandler);

    /// Registers the handler answering inbound calls named `event`.
    fn hook(&self, event: &str, handler: HookHandler);

    /// Calls `method` on the peer and waits for its reply.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Sends a one-way event.
    fn fire(&self, method: &str, args: Vec<Value>) -> Result<()>;

    /// Closes the socket immediately and discards its handlers.
    fn close(&self);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(use_tls: bool, namespace: Option<&str>) -> Endpoint {
        Endpoint {
            host: "127.0.0.1".to_string(),
            port: 8080,
            use_tls,
            subprotocols: Vec::new(),
            namespace: namespace.map(str::to_string),
        }
    }

    #[test]
    fn test_plain_url() {
        let url = endpoint(false, None).url().expect("url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/");
    }

    #[test]
    fn test_tls_url_with_namespace() {
        let url = endpoint(true, Some("/wallet")).url().expect("url");
        assert_eq!(url.as_str(), "wss://127.0.0.1:8080/wallet");
    }

    #[test]
    fn test_invalid_host() {
        let mut bad = endpoint(false, None);
        bad.host = "bad host".to_string();
        assert!(matches!(bad.url(), Err(Error::InvalidUrl(_))));
    }
}
