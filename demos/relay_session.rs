//! End-to-end relay session over WebSocket.
//!
//! Demonstrates:
//! - Starting a relay server on a random localhost port
//! - Connecting a host and an overlay through their own transports
//! - Gated forwarding before and after the overlay enables interception
//! - Session cleanup when the overlay stops
//!
//! Usage:
//!   cargo run --example relay_session
//!   cargo run --example relay_session -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use overlay_relay::{
    ClientOptions, HostConnector, InputHandler, OverlayConnector, RelayServer, Result,
    ServerOptions, WsTransport,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const CONNECT_WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Input Handler
// ============================================================================

/// Overlay handler that consumes back presses and prints scrolls.
struct PrintingHandler;

impl InputHandler for PrintingHandler {
    fn on_back_pressed(&self) -> bool {
        println!("        [overlay] back press consumed");
        true
    }

    fn on_scrolled(&self, scroll_x: i32, scrolling: bool) {
        println!("        [overlay] scrolled to {scroll_x} (scrolling: {scrolling})");
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "overlay_relay=debug"
    } else {
        "overlay_relay=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    println!("=== Relay Session ===\n");

    // ========================================================================
    // Start Relay
    // ========================================================================

    println!("[1] Starting relay server...");
    let server = RelayServer::start(ServerOptions::default()).await?;
    println!("        ✓ Listening on {}\n", server.ws_url());

    // ========================================================================
    // Connect Clients
    // ========================================================================

    println!("[2] Connecting host and overlay...");
    let host = HostConnector::new(Arc::new(WsTransport::new(ClientOptions::new(
        &server.ws_url(),
    )?)));
    let overlay = OverlayConnector::new(Arc::new(WsTransport::new(ClientOptions::new(
        &server.ws_url(),
    )?)));
    overlay.set_input_handler(Arc::new(PrintingHandler));

    host.start()?;
    overlay.start()?;
    host.wait_connected(CONNECT_WAIT).await?;
    overlay.wait_connected(CONNECT_WAIT).await?;
    println!("        ✓ {} connections\n", server.connection_count());

    // ========================================================================
    // Gated Forwarding
    // ========================================================================

    println!("[3] Back press while not interceptable...");
    match host.on_back_pressed().await {
        None => println!("        ✓ Kept local\n"),
        Some(delivery) => println!("        ✗ Unexpected delivery: {delivery:?}\n"),
    }

    println!("[4] Overlay enables interception...");
    overlay.set_input_interceptable(true).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("        ✓ Host flag: {}\n", host.is_input_interceptable());

    println!("[5] Forwarding events...");
    let scroll = host.on_scrolled(120, true).await;
    println!("        scroll: {scroll:?}");
    let back = host.on_back_pressed().await;
    println!("        back press: {back:?}\n");

    // ========================================================================
    // Teardown
    // ========================================================================

    println!("[6] Overlay stops...");
    overlay.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let back = host.on_back_pressed().await;
    println!("        back press after stop: {back:?}\n");

    host.stop();
    server.shutdown().await;
    println!("=== Done ===");

    Ok(())
}
