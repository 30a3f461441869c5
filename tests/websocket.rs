//! End-to-end tests over the WebSocket substrate.
//!
//! A real [`RelayServer`] on a random localhost port, with host and overlay
//! connectors each holding their own [`WsTransport`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

use overlay_relay::{
    ClientOptions, Delivery, HostConnector, InputHandler, OverlayConnector, RelayServer,
    ServerOptions, ServiceName, WsTransport,
};

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingHandler {
    back_presses: AtomicUsize,
    last_scroll: AtomicI32,
}

impl InputHandler for RecordingHandler {
    fn on_back_pressed(&self) -> bool {
        self.back_presses.fetch_add(1, Ordering::SeqCst);
        false
    }

    fn on_scrolled(&self, scroll_x: i32, _scrolling: bool) {
        self.last_scroll.store(scroll_x, Ordering::SeqCst);
    }
}

fn transport(server: &RelayServer) -> anyhow::Result<Arc<WsTransport>> {
    Ok(Arc::new(WsTransport::new(ClientOptions::new(
        &server.ws_url(),
    )?)))
}

/// Polls `condition` until it holds or `WAIT` elapses.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_flag_and_forwarding_over_websocket() -> anyhow::Result<()> {
    let server = RelayServer::start(ServerOptions::default()).await?;

    let overlay = OverlayConnector::new(transport(&server)?);
    let handler = Arc::new(RecordingHandler::default());
    overlay.set_input_handler(handler.clone());
    overlay.start()?;
    overlay.wait_connected(WAIT).await?;

    assert!(overlay.set_input_interceptable(true).await?);

    let host = HostConnector::new(transport(&server)?);
    host.start()?;
    host.wait_connected(WAIT).await?;
    assert!(host.is_input_interceptable());

    assert_eq!(host.on_scrolled(77, true).await, Some(Delivery::Delivered(())));
    assert_eq!(handler.last_scroll.load(Ordering::SeqCst), 77);

    let delivery = host.on_back_pressed().await.expect("forwarded");
    assert_eq!(delivery, Delivery::Delivered(false));
    assert!(!delivery.is_handled());
    assert_eq!(handler.back_presses.load(Ordering::SeqCst), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_flag_push_reaches_connected_host() -> anyhow::Result<()> {
    let server = RelayServer::start(ServerOptions::default()).await?;

    let host = HostConnector::new(transport(&server)?);
    host.start()?;
    host.wait_connected(WAIT).await?;
    assert!(!host.is_input_interceptable());

    let overlay = OverlayConnector::new(transport(&server)?);
    overlay.start()?;
    overlay.wait_connected(WAIT).await?;
    overlay.set_input_interceptable(true).await?;

    assert!(host.is_input_interceptable());

    overlay.set_input_interceptable(false).await?;
    assert!(!host.is_input_interceptable());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_overlay_stop_clears_relay_session() -> anyhow::Result<()> {
    let server = RelayServer::start(ServerOptions::default()).await?;

    let overlay = OverlayConnector::new(transport(&server)?);
    overlay.start()?;
    overlay.wait_connected(WAIT).await?;
    overlay.set_input_interceptable(true).await?;

    let host = HostConnector::new(transport(&server)?);
    host.start()?;
    host.wait_connected(WAIT).await?;

    let endpoint = Arc::clone(server.endpoint());
    assert!(endpoint.has_overlay_session());

    overlay.stop();
    assert!(eventually(|| !endpoint.has_overlay_session()).await);
    assert_eq!(host.on_back_pressed().await, Some(Delivery::NoPeer));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_server_shutdown_disconnects_connectors() -> anyhow::Result<()> {
    let server = RelayServer::start(ServerOptions::default()).await?;

    let host = HostConnector::new(transport(&server)?);
    host.start()?;
    host.wait_connected(WAIT).await?;
    assert_eq!(server.connection_count(), 1);

    server.shutdown().await;
    assert!(eventually(|| !host.is_connected()).await);
    assert!(host.is_bound());
    Ok(())
}

#[tokio::test]
async fn test_mismatched_service_never_connects() -> anyhow::Result<()> {
    let server = RelayServer::start(ServerOptions::default()).await?;
    let options = ClientOptions::new(&server.ws_url())?
        .with_service(ServiceName::new("someone.else"))
        .with_connect_timeout(Duration::from_millis(500));

    let host = HostConnector::new(Arc::new(WsTransport::new(options)));
    host.start()?;

    let result = host.wait_connected(Duration::from_millis(300)).await;
    assert!(result.is_err());
    assert!(host.is_bound());
    assert_eq!(server.connection_count(), 0);

    server.shutdown().await;
    Ok(())
}
