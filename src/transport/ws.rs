//! Websocket transport and event loop.
//!
//! Each socket spawns a tokio task that performs the handshake and then
//! handles:
//!
//! - Outgoing calls and fires from the middleware
//! - Call/reply correlation by [`RequestId`]
//! - Inbound fires, routed to bind handlers in arrival order
//! - Inbound calls, answered by the hook registered for the event

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::Packet;

use super::{
    BindHandler, Endpoint, HandlerTable, HookHandler, LifecycleObservers, SocketHandle, Transport,
};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for the websocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a call's reply.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending calls before rejecting new ones.
const MAX_PENDING_CALLS: usize = 100;

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type WsSink = SplitSink<WsStream, Message>;

/// Map of call IDs to reply channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Packet>>>;

/// Commands from socket handles to the event loop.
enum SocketCommand {
    /// Send a call and route its reply.
    Call {
        packet: Packet,
        reply_tx: oneshot::Sender<Result<Packet>>,
    },
    /// Send a packet that expects no reply.
    Send(Packet),
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Close the socket.
    Shutdown,
}

/// State shared between handles and the event loop.
#[derive(Default)]
struct Shared {
    correlation: Mutex<CorrelationMap>,
    handlers: RwLock<HandlerTable>,
    closed: AtomicBool,
}

impl Shared {
    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fails all pending calls with `ConnectionClosed`.
    fn fail_pending(&self) {
        let pending: Vec<_> = self.correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending calls on close");
        }
    }
}

// ============================================================================
// WsTransport
// ============================================================================

/// Websocket [`Transport`] speaking the JSON [`Packet`] protocol.
///
/// # Example
///
/// ```ignore
/// use socket_middleware::{SocketMiddleware, WsTransport};
///
/// let middleware = SocketMiddleware::builder()
///     .transport(WsTransport::new().with_call_timeout(Duration::from_secs(5)))
///     .build(dispatch, next)?;
/// ```
#[derive(Debug, Clone)]
pub struct WsTransport {
    call_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    /// Creates a transport with the default call timeout (30s).
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the timeout for call replies.
    #[inline]
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Returns the call timeout.
    #[inline]
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

impl Transport for WsTransport {
    fn connect(&self, endpoint: &Endpoint, observers: LifecycleObservers) -> Arc<dyn SocketHandle> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        tokio::spawn(run_socket(
            endpoint.clone(),
            observers,
            command_rx,
            Arc::clone(&shared),
        ));

        Arc::new(WsSocket {
            command_tx,
            shared,
            call_timeout: self.call_timeout,
        })
    }
}

// ============================================================================
// WsSocket
// ============================================================================

/// Handle to one websocket.
struct WsSocket {
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    shared: Arc<Shared>,
    call_timeout: Duration,
}

#[async_trait]
impl SocketHandle for WsSocket {
    fn bind(&self, event: &str, handler: BindHandler) {
        self.shared.handlers.write().bind(event, handler);
    }

    fn hook(&self, event: &str, handler: HookHandler) {
        self.shared.handlers.write().hook(event, handler);
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        if self.shared.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        {
            let correlation = self.shared.correlation.lock();
            if correlation.len() >= MAX_PENDING_CALLS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_CALLS,
                    "Too many pending calls"
                );
                return Err(Error::protocol(format!(
                    "Too many pending calls: {}/{}",
                    correlation.len(),
                    MAX_PENDING_CALLS
                )));
            }
        }

        let request_id = RequestId::generate();
        let packet = Packet::Call {
            id: request_id,
            event: method.to_string(),
            args,
        };
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(SocketCommand::Call { packet, reply_tx })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(self.call_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply?.into_reply(method),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(SocketCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(
                    request_id,
                    self.call_timeout.as_millis() as u64,
                ))
            }
        }
    }

    fn fire(&self, method: &str, args: Vec<Value>) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        self.command_tx
            .send(SocketCommand::Send(Packet::fire(method, args)))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.handlers.write().clear();
        let _ = self.command_tx.send(SocketCommand::Shutdown);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Opens the websocket with subprotocols and a handshake timeout.
async fn open_stream(endpoint: &Endpoint) -> Result<WsStream> {
    let url = endpoint.url()?;
    let mut request = url.as_str().into_client_request()?;

    if !endpoint.subprotocols.is_empty() {
        let protocols = HeaderValue::from_str(&endpoint.subprotocols.join(", "))
            .map_err(|e| Error::config(format!("Invalid subprotocol list: {e}")))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", protocols);
    }

    let (stream, response) = timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| Error::connection_timeout(CONNECT_TIMEOUT.as_millis() as u64))?
        .map_err(|e| Error::connection(format!("WebSocket handshake failed: {e}")))?;

    debug!(%url, status = %response.status(), "WebSocket handshake completed");

    Ok(stream)
}

/// Socket task: handshake, then I/O until closed.
async fn run_socket(
    endpoint: Endpoint,
    observers: LifecycleObservers,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    shared: Arc<Shared>,
) {
    let stream = match open_stream(&endpoint).await {
        Ok(stream) => stream,
        Err(e) => {
            if !shared.is_closed() {
                (observers.on_error)(e);
            }
            shared.fail_pending();
            return;
        }
    };

    let (mut ws_write, mut ws_read) = stream.split();

    if shared.is_closed() {
        debug!("Socket closed during handshake");
        let _ = ws_write.close().await;
        shared.fail_pending();
        return;
    }

    (observers.on_connect)();

    // Hook replies are produced by spawned tasks and funneled back here.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Packet>();

    loop {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_incoming(&text, &shared, &reply_tx);
                    }

                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket closed by remote");
                        if !shared.is_closed() {
                            (observers.on_error)(Error::ConnectionClosed);
                        }
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        if !shared.is_closed() {
                            (observers.on_error)(Error::WebSocket(e));
                        }
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(SocketCommand::Call { packet, reply_tx }) => {
                        send_call(packet, reply_tx, &mut ws_write, &shared).await;
                    }

                    Some(SocketCommand::Send(packet)) => {
                        send_packet(&packet, &mut ws_write).await;
                    }

                    Some(SocketCommand::RemoveCorrelation(request_id)) => {
                        shared.correlation.lock().remove(&request_id);
                        debug!(%request_id, "Removed timed-out correlation");
                    }

                    Some(SocketCommand::Shutdown) => {
                        debug!("Shutdown command received");
                        let _ = ws_write.close().await;
                        break;
                    }

                    None => {
                        debug!("All socket handles dropped");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }

            Some(reply) = reply_rx.recv() => {
                send_packet(&reply, &mut ws_write).await;
            }
        }
    }

    shared.fail_pending();

    debug!("Socket event loop terminated");
}

/// Routes an inbound text frame.
fn handle_incoming(text: &str, shared: &Shared, reply_tx: &mpsc::UnboundedSender<Packet>) {
    let packet = match Packet::from_text(text) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(error = %e, text = %text, "Failed to parse incoming frame");
            return;
        }
    };

    match packet {
        Packet::Ack { id, .. } | Packet::Error { id, .. } => {
            let tx = shared.correlation.lock().remove(&id);

            if let Some(tx) = tx {
                let _ = tx.send(Ok(packet));
            } else {
                warn!(%id, "Reply for unknown call");
            }
        }

        Packet::Fire { event, args } => {
            let handlers = shared.handlers.read().binds_for(&event);
            trace!(%event, handlers = handlers.len(), "Inbound fire");

            for handler in handlers {
                handler(args.clone());
            }
        }

        Packet::Call { id, event, args } => {
            let hook = shared.handlers.read().hook_for(&event);

            let Some(hook) = hook else {
                debug!(%event, "No hook for inbound call");
                let _ = reply_tx.send(Packet::error(id, format!("No hook for '{event}'")));
                return;
            };

            let ack = hook(args.into_iter().next());
            let reply_tx = reply_tx.clone();

            tokio::spawn(async move {
                let payload = ack.await;
                let _ = reply_tx.send(Packet::ack_bytes(id, &payload));
            });
        }
    }
}

/// Registers the call's correlation and writes it.
async fn send_call(
    packet: Packet,
    reply_tx: oneshot::Sender<Result<Packet>>,
    ws_write: &mut WsSink,
    shared: &Shared,
) {
    let Some(request_id) = packet.id() else {
        let _ = reply_tx.send(Err(Error::protocol("call packet without id")));
        return;
    };

    let text = match packet.to_text() {
        Ok(text) => text,
        Err(e) => {
            let _ = reply_tx.send(Err(e));
            return;
        }
    };

    // Store correlation before sending
    shared.correlation.lock().insert(request_id, reply_tx);

    if let Err(e) = ws_write.send(Message::Text(text.into())).await
        && let Some(tx) = shared.correlation.lock().remove(&request_id)
    {
        let _ = tx.send(Err(Error::connection(e.to_string())));
    }

    trace!(%request_id, "Call sent");
}

/// Writes a packet that expects no reply.
async fn send_packet(packet: &Packet, ws_write: &mut WsSink) {
    match packet.to_text() {
        Ok(text) => {
            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                warn!(error = %e, "Failed to send packet");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize packet"),
    }
}

// ============================================================================
// Tests
// ============================================================================
