//! WebSocket connection and event loop.
//!
//! A [`Connection`] is symmetric: both the relay and its clients send
//! requests over it and serve requests arriving on it.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Outgoing requests, correlated with responses by [`CallId`]
//! - Incoming requests, each dispatched on its own task
//! - Replies produced by those dispatch tasks
//!
//! Dispatching on separate tasks lets a handler make nested calls over the
//! same connection (a registration that pushes state back to the caller).
//!
//! When the loop ends, pending calls fail with [`Error::ConnectionClosed`]
//! and the connection's [`DeathNotifier`] fires.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{CallId, ConnectionId};
use crate::protocol::{Call, Frame, Request, Response};

use super::liveness::{DeathNotifier, Liveness};

// ============================================================================
// Constants
// ============================================================================

/// Maximum outgoing calls awaiting a response.
const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Map of call IDs to response channels.
type CorrelationMap = FxHashMap<CallId, oneshot::Sender<Result<Response>>>;

/// Shared dispatcher slot.
type DispatcherSlot = Arc<Mutex<Option<Arc<dyn CallDispatcher>>>>;

// ============================================================================
// CallDispatcher
// ============================================================================

/// Serves calls arriving on a connection.
#[async_trait]
pub trait CallDispatcher: Send + Sync {
    /// Handles one call and returns its JSON result.
    async fn dispatch(&self, call: Call) -> Result<Value>;
}

// ============================================================================
// Frame I/O
// ============================================================================

/// Sends one frame on a raw stream.
pub(crate) async fn send_frame<S>(ws: &mut WebSocketStream<S>, frame: &Frame) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = to_string(frame)?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Receives the next frame from a raw stream, skipping control messages.
///
/// # Errors
///
/// - [`Error::ConnectionClosed`] if the peer closes first
/// - [`Error::Protocol`] on binary or malformed frames
pub(crate) async fn recv_frame<S>(ws: &mut WebSocketStream<S>) -> Result<Frame>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return from_str::<Frame>(&text)
                    .map_err(|e| Error::protocol(format!("Malformed frame: {e}")));
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(Error::protocol("Binary frames are not supported"));
            }
            Some(Ok(Message::Close(_))) | None => return Err(Error::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a request and wait for response.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Send the response to an incoming request.
    Reply(Response),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// One WebSocket connection between a client and the relay.
///
/// Cloning yields another handle to the same connection. The event loop
/// runs until [`shutdown`](Self::shutdown), until the peer closes, or until
/// every handle is dropped.
pub struct Connection {
    id: ConnectionId,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Incoming call handler (shared with event loop).
    dispatcher: DispatcherSlot,
    /// Fires when the event loop ends.
    liveness: Liveness,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            command_tx: self.command_tx.clone(),
            correlation: Arc::clone(&self.correlation),
            dispatcher: Arc::clone(&self.dispatcher),
            liveness: self.liveness.clone(),
        }
    }
}

impl Connection {
    /// Wraps a stream whose bind handshake has completed.
    ///
    /// `dispatcher` builds the incoming call handler; it may keep a clone of
    /// the connection. It is installed before the event loop starts, so no
    /// incoming call is ever missed.
    pub(crate) fn spawn<S, F>(id: ConnectionId, ws_stream: WebSocketStream<S>, dispatcher: F) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce(&Connection) -> Arc<dyn CallDispatcher>,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let notifier = DeathNotifier::new();

        let connection = Self {
            id,
            command_tx,
            correlation: Arc::new(Mutex::new(CorrelationMap::default())),
            dispatcher: Arc::new(Mutex::new(None)),
            liveness: notifier.liveness(),
        };
        *connection.dispatcher.lock() = Some(dispatcher(&connection));

        let reply_tx = connection.command_tx.downgrade();
        tokio::spawn(Self::run_event_loop(
            id,
            ws_stream,
            command_rx,
            reply_tx,
            Arc::clone(&connection.correlation),
            Arc::clone(&connection.dispatcher),
            notifier,
        ));

        connection
    }

    /// Returns the connection ID agreed during the handshake.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the liveness of this connection.
    #[inline]
    #[must_use]
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Returns `true` until the event loop ends.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Sends a call and waits for its result.
    ///
    /// There is no timeout: a call fails only when the peer answers with an
    /// error or the connection ends.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::Remote`] if the peer answered with an error
    /// - [`Error::Protocol`] if too many calls are pending
    pub async fn call(&self, call: Call) -> Result<Value> {
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    connection = %self.id,
                    pending = correlation.len(),
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(ConnectionCommand::Send {
                request: Request::new(call),
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        let response = response_rx.await.map_err(|_| Error::ConnectionClosed)??;
        response.into_result()
    }

    /// Returns the number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Closes the connection.
    ///
    /// Not called on drop: clones share the event loop.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        id: ConnectionId,
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        reply_tx: mpsc::WeakUnboundedSender<ConnectionCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        dispatcher: DispatcherSlot,
        notifier: DeathNotifier,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(id, &text, &correlation, &dispatcher, &reply_tx);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %id, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(connection = %id, error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!(connection = %id, "WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { request, response_tx }) => {
                            let request_id = request.id;
                            correlation.lock().insert(request_id, response_tx);

                            if let Err(e) = Self::write_frame(&mut ws_write, &Frame::Request(request)).await
                                && let Some(tx) = correlation.lock().remove(&request_id)
                            {
                                let _ = tx.send(Err(e));
                            }
                            trace!(connection = %id, %request_id, "Request sent");
                        }

                        Some(ConnectionCommand::Reply(response)) => {
                            if let Err(e) = Self::write_frame(&mut ws_write, &Frame::Response(response)).await {
                                warn!(connection = %id, error = %e, "Failed to send reply");
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!(connection = %id, "Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!(connection = %id, "All connection handles dropped");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        Self::fail_pending_requests(id, &correlation);
        dispatcher.lock().take();
        notifier.fire();

        debug!(connection = %id, "Event loop terminated");
    }

    async fn write_frame<W>(ws_write: &mut W, frame: &Frame) -> Result<()>
    where
        W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let json = to_string(frame)?;
        ws_write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| Error::connection(e.to_string()))
    }

    /// Handles an incoming text message.
    fn handle_incoming_message(
        id: ConnectionId,
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        dispatcher: &DispatcherSlot,
        reply_tx: &mpsc::WeakUnboundedSender<ConnectionCommand>,
    ) {
        match from_str::<Frame>(text) {
            Ok(Frame::Response(response)) => {
                let tx = correlation.lock().remove(&response.id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => warn!(connection = %id, call = %response.id, "Response for unknown request"),
                }
            }

            Ok(Frame::Request(request)) => {
                let handler = dispatcher.lock().clone();
                let Some(reply_tx) = reply_tx.upgrade() else {
                    return;
                };
                trace!(connection = %id, method = request.call.method(), "Dispatching call");

                tokio::spawn(async move {
                    let method = request.call.method();
                    let result = match handler {
                        Some(handler) => handler.dispatch(request.call).await,
                        None => Err(Error::unknown_method(method)),
                    };
                    if let Err(e) = &result {
                        debug!(connection = %id, method, error = %e, "Call failed");
                    }
                    let _ = reply_tx.send(ConnectionCommand::Reply(Response::from_result(
                        request.id, result,
                    )));
                });
            }

            Ok(other) => {
                warn!(connection = %id, frame = ?other, "Unexpected frame after handshake");
            }

            Err(e) => {
                warn!(connection = %id, error = %e, "Failed to parse incoming frame");
            }
        }
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(id: ConnectionId, correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(connection = %id, count, "Failed pending requests on shutdown");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
