//! WebSocket client transport.
//!
//! Each bind opens its own WebSocket connection to a [`RelayServer`] and
//! runs the bind handshake on a background task. The connection's death is
//! the channel's death.
//!
//! | Event | Delivered as |
//! |-------|--------------|
//! | Handshake completes | `on_service_connected` |
//! | Connection lost while bound | `on_service_disconnected` |
//! | Handshake fails | Logged; the bind stays outstanding |
//! | `unbind` | Nothing |
//!
//! There is no reconnect: a lost connection stays lost until the connector
//! unbinds and binds again.
//!
//! [`RelayServer`]: super::RelayServer

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{BindingId, ConnectionId};
use crate::options::ClientOptions;
use crate::protocol::Frame;

use super::connection::{CallDispatcher, Connection, recv_frame, send_frame};
use super::remote::{ClientDispatcher, client_service};
use super::{BindAction, ServiceConnection, Transport};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One outstanding bind.
struct ClientBinding {
    /// Set by `unbind`; suppresses the disconnect notification.
    released: Arc<AtomicBool>,
    /// The connection once the handshake completes.
    connection: Arc<Mutex<Option<Connection>>>,
    /// Task running the handshake and watching the connection.
    task: JoinHandle<()>,
}

// ============================================================================
// WsTransport
// ============================================================================

/// Reaches a relay server over WebSocket.
///
/// # Example
///
/// ```ignore
/// let options = ClientOptions::new("ws://127.0.0.1:9000")?;
/// let overlay = OverlayConnector::new(Arc::new(WsTransport::new(options)));
/// overlay.start()?;
/// ```
pub struct WsTransport {
    options: ClientOptions,
    bindings: Mutex<FxHashMap<BindingId, ClientBinding>>,
}

impl WsTransport {
    /// Creates a transport for the relay described by `options`.
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            bindings: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the transport options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns the number of outstanding binds.
    #[inline]
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.lock().len()
    }
}

// ============================================================================
// WsTransport - Transport
// ============================================================================

impl Transport for WsTransport {
    fn bind(
        &self,
        action: BindAction,
        connection: Arc<dyn ServiceConnection>,
    ) -> Result<BindingId> {
        let runtime =
            Handle::try_current().map_err(|e| Error::bind_failed(action, e.to_string()))?;

        let id = BindingId::next();
        let released = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(Mutex::new(None));

        let mut bindings = self.bindings.lock();
        let task = runtime.spawn(run_binding(
            self.options.clone(),
            action,
            id,
            connection,
            Arc::clone(&released),
            Arc::clone(&slot),
        ));
        bindings.insert(
            id,
            ClientBinding {
                released,
                connection: slot,
                task,
            },
        );

        debug!(%action, binding = %id, url = %self.options.url, "WebSocket bind");
        Ok(id)
    }

    fn unbind(&self, binding: BindingId) {
        let Some(entry) = self.bindings.lock().remove(&binding) else {
            debug!(%binding, "Unbind of unknown binding");
            return;
        };

        let connection = {
            let mut slot = entry.connection.lock();
            entry.released.store(true, Ordering::SeqCst);
            slot.take()
        };

        match connection {
            Some(connection) => connection.shutdown(),
            None => entry.task.abort(),
        }
        debug!(%binding, "WebSocket unbind");
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for (_, entry) in self.bindings.get_mut().drain() {
            entry.released.store(true, Ordering::SeqCst);
            match entry.connection.lock().take() {
                Some(connection) => connection.shutdown(),
                None => entry.task.abort(),
            }
        }
    }
}

// ============================================================================
// Binding Task
// ============================================================================

/// Connects, completes the handshake and watches the connection.
async fn run_binding(
    options: ClientOptions,
    action: BindAction,
    binding: BindingId,
    service_connection: Arc<dyn ServiceConnection>,
    released: Arc<AtomicBool>,
    slot: Arc<Mutex<Option<Connection>>>,
) {
    let limit = options.connect_timeout;
    let (ws_stream, connection_id) = match timeout(limit, handshake(&options, action)).await {
        Ok(Ok(bound)) => bound,
        Ok(Err(e)) => {
            warn!(error = %e, %action, %binding, "Bind handshake failed");
            return;
        }
        Err(_) => {
            let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            warn!(timeout_ms, %action, %binding, "Bind handshake timed out");
            return;
        }
    };

    let callbacks = Arc::new(ClientDispatcher::default());
    let dispatcher = Arc::clone(&callbacks);
    let connection = Connection::spawn(connection_id, ws_stream, move |_| {
        dispatcher as Arc<dyn CallDispatcher>
    });

    let (closed_tx, closed_rx) = oneshot::channel::<()>();
    let _ = connection.liveness().link(Box::new(move || {
        let _ = closed_tx.send(());
    }));

    {
        let mut slot = slot.lock();
        if released.load(Ordering::SeqCst) {
            connection.shutdown();
            return;
        }
        *slot = Some(connection.clone());
    }

    info!(%action, %binding, connection = %connection_id, "Connected to relay");
    service_connection
        .on_service_connected(client_service(action, &connection, callbacks))
        .await;

    let _ = closed_rx.await;
    if released.load(Ordering::SeqCst) {
        debug!(%binding, "Released connection closed");
        return;
    }

    warn!(%action, %binding, connection = %connection_id, "Relay connection lost");
    service_connection.on_service_disconnected().await;
}

/// Opens the WebSocket and exchanges the bind frames.
async fn handshake(options: &ClientOptions, action: BindAction) -> Result<(WsStream, ConnectionId)> {
    let (mut ws_stream, _) = connect_async(options.url.as_str())
        .await
        .map_err(|e| Error::connection(format!("WebSocket connect failed: {e}")))?;

    let bind = Frame::Bind {
        package: options.service.package.clone(),
        action: options.service.action(action).to_owned(),
    };
    send_frame(&mut ws_stream, &bind).await?;

    match recv_frame(&mut ws_stream).await? {
        Frame::Bound { connection_id } => Ok((ws_stream, connection_id)),
        Frame::Rejected { message } => Err(Error::bind_failed(action, message)),
        other => Err(Error::protocol(format!(
            "Expected bound frame, got {other:?}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
