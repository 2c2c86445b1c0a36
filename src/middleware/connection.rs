//! Connection slot management.
//!
//! The middleware owns at most one socket. [`ConnectionManager`] opens it,
//! authenticates it, binds listeners once authenticated, and closes it.
//!
//! # Epochs
//!
//! Every connect, disconnect and reset advances the slot [`Epoch`]. Each
//! observer, listener and pending call captures the epoch it was started
//! under and does nothing once the slot has moved on, so a superseded
//! socket can never mark the slot connected or dispatch actions.
//!
//! # States
//!
//! ```text
//!                connect            auth ok
//! Disconnected ─────────► Connecting ────────► Connected
//!      ▲                      │                    │
//!      └──────────────────────┴────────────────────┘
//!           disconnect (or transport error with Reset)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::action::{Action, ConnectionConfig, kinds};
use crate::error::Error;
use crate::identifiers::Epoch;
use crate::pipeline::Pipeline;
use crate::transport::{LifecycleObservers, SocketHandle, Transport};

use super::listeners::ListenerRegistry;
use super::options::{FailurePolicy, MiddlewareOptions, TransportErrorPolicy};
use super::report_error;

// ============================================================================
// ConnectionState
// ============================================================================

/// State of the connection slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Socket created, handshake or authentication pending.
    Connecting,
    /// Socket authenticated and listeners bound.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// EpochGate
// ============================================================================

/// Lock-free view of the current slot epoch.
#[derive(Debug, Clone, Default)]
pub(crate) struct EpochGate(Arc<AtomicU64>);

impl EpochGate {
    #[inline]
    pub(crate) fn current(&self) -> Epoch {
        Epoch::from_u64(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn is_current(&self, epoch: Epoch) -> bool {
        self.current() == epoch
    }

    #[inline]
    fn set(&self, epoch: Epoch) {
        self.0.store(epoch.as_u64(), Ordering::Release);
    }
}

// ============================================================================
// LiveSocket
// ============================================================================

/// Non-owning reference to the connected socket.
///
/// Resolves to `None` once the slot has moved past the epoch the reference
/// was taken under, or the socket has been dropped.
#[derive(Clone)]
pub(crate) struct LiveSocket {
    epoch: Epoch,
    socket: Weak<dyn SocketHandle>,
    gate: EpochGate,
}

impl LiveSocket {
    #[inline]
    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn SocketHandle>> {
        if !self.gate.is_current(self.epoch) {
            return None;
        }
        self.socket.upgrade()
    }
}

impl fmt::Debug for LiveSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSocket")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

struct Slot {
    epoch: Epoch,
    state: ConnectionState,
    socket: Option<Arc<dyn SocketHandle>>,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    options: Arc<MiddlewareOptions>,
    pipeline: Pipeline,
    listeners: ListenerRegistry,
    gate: EpochGate,
    slot: Mutex<Slot>,
}

/// Owns the socket slot.
pub(crate) struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("ConnectionManager")
            .field("epoch", &slot.epoch)
            .field("state", &slot.state)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        options: Arc<MiddlewareOptions>,
        pipeline: Pipeline,
    ) -> Self {
        let gate = EpochGate::default();
        let listeners = ListenerRegistry::new(pipeline.clone(), gate.clone(), options.debug);

        Self {
            inner: Arc::new(ManagerInner {
                transport,
                options,
                pipeline,
                listeners,
                gate,
                slot: Mutex::new(Slot {
                    epoch: Epoch::INITIAL,
                    state: ConnectionState::Disconnected,
                    socket: None,
                }),
            }),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.slot.lock().state
    }

    #[inline]
    pub(crate) fn epoch(&self) -> Epoch {
        self.inner.slot.lock().epoch
    }

    /// Returns the socket if the slot is connected.
    pub(crate) fn live_socket(&self) -> Option<LiveSocket> {
        let slot = self.inner.slot.lock();
        if slot.state != ConnectionState::Connected {
            return None;
        }

        slot.socket.as_ref().map(|socket| LiveSocket {
            epoch: slot.epoch,
            socket: Arc::downgrade(socket),
            gate: self.inner.gate.clone(),
        })
    }

    /// Replaces any existing socket with a new one for `config`.
    ///
    /// The slot lock is held across `Transport::connect`, so an observer
    /// fired early from another thread waits until the socket is stored.
    pub(crate) fn connect(&self, config: ConnectionConfig) {
        let endpoint = config.endpoint();
        let mut slot = self.inner.slot.lock();

        let epoch = slot.epoch.next();
        slot.epoch = epoch;
        self.inner.gate.set(epoch);

        if let Some(previous) = slot.socket.take() {
            debug!(%epoch, "Closing superseded socket");
            previous.close();
        }

        slot.state = ConnectionState::Connecting;

        if self.inner.options.debug {
            info!(host = %endpoint.host, port = endpoint.port, tls = endpoint.use_tls, %epoch, "Connecting socket");
        }

        let observers = self.observers(epoch, config.api_key);
        slot.socket = Some(self.inner.transport.connect(&endpoint, observers));
    }

    /// Closes the socket, if any, and reports the disconnect.
    pub(crate) fn disconnect(&self) {
        let previous = {
            let mut slot = self.inner.slot.lock();
            let epoch = slot.epoch.next();
            slot.epoch = epoch;
            self.inner.gate.set(epoch);
            slot.state = ConnectionState::Disconnected;
            slot.socket.take()
        };

        if let Some(socket) = previous {
            socket.close();
        }

        if self.inner.options.debug {
            info!("Socket disconnected");
        }

        match &self.inner.options.disconnected_action {
            Some(substitute) => self.inner.pipeline.next(substitute.clone()),
            None => self
                .inner
                .pipeline
                .dispatch(Action::new(kinds::SOCKET_DISCONNECTED)),
        }
    }

    /// Builds the observers for the socket opened under `epoch`.
    fn observers(&self, epoch: Epoch, api_key: Option<String>) -> LifecycleObservers {
        let on_connect = {
            let weak = Arc::downgrade(&self.inner);
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.on_handshake(epoch, api_key.clone());
            })
        };

        let on_error = {
            let weak = Arc::downgrade(&self.inner);
            Box::new(move |error: Error| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.on_transport_error(epoch, error);
            })
        };

        LifecycleObservers {
            on_connect,
            on_error,
        }
    }
}

// ============================================================================
// ManagerInner - Observers
// ============================================================================

impl ManagerInner {
    /// Returns the slot's socket if `epoch` is still current.
    fn socket_at(&self, epoch: Epoch) -> Option<Arc<dyn SocketHandle>> {
        let slot = self.slot.lock();
        if slot.epoch != epoch {
            return None;
        }
        slot.socket.clone()
    }

    fn on_handshake(self: Arc<Self>, epoch: Epoch, api_key: Option<String>) {
        let Some(socket) = self.socket_at(epoch) else {
            debug!(%epoch, "Ignoring handshake of superseded socket");
            return;
        };

        if self.options.debug {
            info!(%epoch, "Socket handshake complete, authenticating");
        }

        tokio::spawn(async move {
            self.authenticate(epoch, socket, api_key).await;
        });
    }

    async fn authenticate(
        &self,
        epoch: Epoch,
        socket: Arc<dyn SocketHandle>,
        api_key: Option<String>,
    ) {
        let key = api_key.map_or(Value::Null, Value::String);

        if let Err(e) = socket.call(&self.options.auth_method, vec![key]).await {
            match self.options.auth_failures {
                FailurePolicy::Swallow => {
                    error!(%epoch, error = %e, "Unhandled socket authentication failure");
                }
                FailurePolicy::Report => {
                    if self.gate.is_current(epoch) {
                        report_error(&self.options, &self.pipeline, &e);
                    }
                }
            }
            return;
        }

        let bound = {
            let mut slot = self.slot.lock();
            if slot.epoch != epoch {
                debug!(%epoch, "Authentication finished for superseded socket");
                return;
            }
            slot.state = ConnectionState::Connected;
            self.listeners
                .bind(socket.as_ref(), epoch, &self.options.listeners)
        };

        if self.options.debug {
            info!(%epoch, listeners = bound, "Socket connected");
        }

        if self.gate.is_current(epoch) {
            self.pipeline
                .dispatch(Action::new(kinds::SOCKET_CONNECTED));
        }
    }

    fn on_transport_error(&self, epoch: Epoch, error: Error) {
        if !self.gate.is_current(epoch) {
            debug!(%epoch, error = %error, "Ignoring error from superseded socket");
            return;
        }

        if self.options.debug {
            error!(%epoch, error = %error, "Socket error");
        }

        if self.options.transport_errors == TransportErrorPolicy::Reset {
            let previous = {
                let mut slot = self.slot.lock();
                if slot.epoch != epoch {
                    return;
                }
                let next = slot.epoch.next();
                slot.epoch = next;
                self.gate.set(next);
                slot.state = ConnectionState::Disconnected;
                slot.socket.take()
            };

            if let Some(socket) = previous {
                socket.close();
            }
        }

        report_error(&self.options, &self.pipeline, &error);
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(socket) = self.slot.get_mut().socket.take() {
            socket.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
