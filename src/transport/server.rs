//! WebSocket relay server.
//!
//! Hosts one [`RelayEndpoint`] and serves it to every client that completes
//! the bind handshake.
//!
//! # Handshake
//!
//! ```text
//! Client                          RelayServer
//!   │── WebSocket upgrade ──────────▶│
//!   │── bind {package, action} ─────▶│  resolve against ServiceName
//!   │◀───────── bound {connectionId} │  or rejected {message}
//!   │◀══════ requests / responses ══▶│
//! ```
//!
//! A connection serves exactly one contract, chosen by the bind action.
//! When it closes, the sessions it registered are cleared through its
//! liveness.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::options::ServerOptions;
use crate::protocol::Frame;
use crate::relay::RelayEndpoint;

use super::connection::{CallDispatcher, Connection, recv_frame, send_frame};
use super::remote::RelayDispatcher;

// ============================================================================
// Constants
// ============================================================================

/// Accept poll interval, bounds shutdown latency.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// RelayServer
// ============================================================================

/// WebSocket server hosting the relay.
///
/// # Example
///
/// ```ignore
/// let server = RelayServer::start(ServerOptions::default()).await?;
/// let options = ClientOptions::new(&server.ws_url())?;
///
/// let host = HostConnector::new(Arc::new(WsTransport::new(options)));
/// host.start()?;
/// ```
pub struct RelayServer {
    /// Bound address.
    addr: SocketAddr,

    /// Options the server was started with.
    options: ServerOptions,

    /// The relay served to every connection.
    endpoint: Arc<RelayEndpoint>,

    /// Connections past the handshake.
    connections: RwLock<FxHashMap<ConnectionId, Connection>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// RelayServer - Constructor
// ============================================================================

impl RelayServer {
    /// Binds the listener and starts the accept loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the service name is invalid
    /// - [`Error::Io`] if binding fails
    pub async fn start(options: ServerOptions) -> Result<Arc<Self>> {
        options.relay.service.validate()?;

        let listener = TcpListener::bind(SocketAddr::new(options.ip, options.port)).await?;
        let addr = listener.local_addr()?;

        let server = Arc::new(Self {
            addr,
            endpoint: RelayEndpoint::new(options.relay.clone()),
            options,
            connections: RwLock::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        let accept = Arc::clone(&server);
        tokio::spawn(async move {
            accept.accept_loop(listener).await;
        });

        info!(%addr, package = %server.options.relay.service.package, "RelayServer started");

        Ok(server)
    }
}

// ============================================================================
// RelayServer - Public API
// ============================================================================

impl RelayServer {
    /// Returns the relay endpoint served by this server.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Arc<RelayEndpoint> {
        &self.endpoint
    }

    /// Returns the WebSocket URL clients connect to.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns the number of connections past the handshake.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Stops accepting and closes every connection.
    ///
    /// Closing a connection clears any session it registered.
    pub async fn shutdown(&self) {
        info!("RelayServer shutting down");

        let connections: Vec<_> = {
            let mut map = self.connections.write();
            self.shutdown.store(true, Ordering::SeqCst);
            map.drain().collect()
        };

        for (id, connection) in connections {
            connection.shutdown();
            debug!(connection = %id, "Connection closed during shutdown");
        }

        info!("RelayServer shutdown complete");
    }
}

// ============================================================================
// RelayServer - Accept Loop
// ============================================================================

impl RelayServer {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades, runs the bind handshake and starts serving.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "New TCP connection");

        let limit = self.options.handshake_timeout;
        let timed_out =
            || Error::connection_timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX));

        let mut ws_stream = timeout(limit, tokio_tungstenite::accept_async(stream))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let frame = timeout(limit, recv_frame(&mut ws_stream))
            .await
            .map_err(|_| timed_out())??;

        let Frame::Bind { package, action } = frame else {
            let message = "Expected bind frame";
            send_frame(&mut ws_stream, &Frame::Rejected { message: message.into() }).await?;
            return Err(Error::protocol(message));
        };

        let Some(bind_action) = self.options.relay.service.resolve(&package, &action) else {
            let message = format!("Unknown service: {package}/{action}");
            send_frame(&mut ws_stream, &Frame::Rejected { message: message.clone() }).await?;
            return Err(Error::protocol(message));
        };

        let id = ConnectionId::next();
        send_frame(&mut ws_stream, &Frame::Bound { connection_id: id }).await?;

        let endpoint = Arc::clone(&self.endpoint);
        let connection = Connection::spawn(id, ws_stream, |connection| {
            Arc::new(RelayDispatcher::new(endpoint, bind_action, connection.clone()))
                as Arc<dyn CallDispatcher>
        });

        self.track(connection);
        info!(connection = %id, action = %bind_action, ?addr, "Client bound");

        Ok(())
    }

    /// Keeps `connection` until it dies, or closes it if the server is
    /// shutting down.
    fn track(self: &Arc<Self>, connection: Connection) {
        let id = connection.id();
        let liveness = connection.liveness().clone();
        {
            let mut connections = self.connections.write();
            if self.shutdown.load(Ordering::SeqCst) {
                drop(connections);
                connection.shutdown();
                debug!(connection = %id, "Connection closed, server shutting down");
                return;
            }
            connections.insert(id, connection);
        }

        let server: Weak<Self> = Arc::downgrade(self);
        let linked = liveness.link(Box::new(move || {
            if let Some(server) = server.upgrade()
                && server.connections.write().remove(&id).is_some()
            {
                debug!(connection = %id, "Connection removed");
            }
        }));

        if linked.is_err() {
            self.connections.write().remove(&id);
            debug!(connection = %id, "Connection closed during handshake");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::SinkExt;
    use tokio::io::{AsyncReadExt, duplex};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::{WebSocketStream, connect_async};

    use crate::options::{DEFAULT_PACKAGE, ServiceName};
    use crate::transport::BindAction;

    #[tokio::test]
    async fn test_server_creation() {
        let server = RelayServer::start(ServerOptions::default())
            .await
            .expect("server start");
        assert!(server.port() > 0);
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}", server.port()));
        assert_eq!(server.connection_count(), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_service_rejected_at_start() {
        let service = ServiceName::new("pkg")
            .with_host_action("same")
            .with_overlay_action("same");
        let options = ServerOptions::default()
            .with_relay(crate::options::RelayOptions::default().with_service(service));

        let result = RelayServer::start(options).await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let server = RelayServer::start(ServerOptions::default())
            .await
            .expect("server start");
        let (mut ws, _) = connect_async(server.ws_url()).await.expect("connect");

        let bind = Frame::Bind {
            package: DEFAULT_PACKAGE.into(),
            action: "overlay.relay.action.UNKNOWN".into(),
        };
        send_frame(&mut ws, &bind).await.expect("send");

        let reply = recv_frame(&mut ws).await.expect("reply");
        assert!(matches!(reply, Frame::Rejected { .. }));
        assert_eq!(server.connection_count(), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_bound_connection_tracked_until_close() {
        let server = RelayServer::start(ServerOptions::default())
            .await
            .expect("server start");
        let (mut ws, _) = connect_async(server.ws_url()).await.expect("connect");

        let bind = Frame::Bind {
            package: DEFAULT_PACKAGE.into(),
            action: ServiceName::default().host_action,
        };
        send_frame(&mut ws, &bind).await.expect("send");
        let reply = recv_frame(&mut ws).await.expect("reply");
        assert!(matches!(reply, Frame::Bound { .. }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connection_count(), 1);

        ws.send(Message::Close(None)).await.expect("close");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.connection_count(), 0);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_after_shutdown_is_closed() {
        let server = RelayServer::start(ServerOptions::default())
            .await
            .expect("server start");
        server.shutdown().await;

        let (relay_end, _client_end) = duplex(64 * 1024);
        let ws = WebSocketStream::from_raw_socket(relay_end, Role::Server, None).await;
        let endpoint = Arc::clone(server.endpoint());
        let connection = Connection::spawn(ConnectionId::next(), ws, |connection| {
            Arc::new(RelayDispatcher::new(endpoint, BindAction::Host, connection.clone()))
                as Arc<dyn CallDispatcher>
        });

        server.track(connection.clone());
        assert_eq!(server.connection_count(), 0);

        for _ in 0..50 {
            if !connection.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!connection.is_alive());
    }

    #[tokio::test]
    async fn test_stalled_upgrade_times_out() {
        let options = ServerOptions::default().with_handshake_timeout(Duration::from_millis(100));
        let server = RelayServer::start(options).await.expect("server start");

        let mut stream = TcpStream::connect(("127.0.0.1", server.port()))
            .await
            .expect("tcp connect");
        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server closed the socket in time");
        assert!(matches!(read, Ok(0) | Err(_)));

        server.shutdown().await;
    }
}
