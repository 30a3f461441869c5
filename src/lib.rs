//! Overlay Relay - Input-interception relay between a host and an overlay.
//!
//! Two client processes, a *host* that owns the scrollable surface and an
//! *overlay* drawn on top of it, never talk directly. Both bind to a
//! *relay* that holds one session per role and forwards events between
//! them.
//!
//! # Architecture
//!
//! - **Overlay**: decides whether input is interceptable and tells the relay
//! - **Relay**: stores the flag, pushes it to the host, forwards host events
//! - **Host**: caches the flag and forwards scrolls and back presses only
//!   while it is set
//!
//! Key design principles:
//!
//! - At most one session per role; a dead client's session is cleared
//!   through liveness, not by polling
//! - Connectors are refcounted: the first `start` binds, the last `stop`
//!   unbinds
//! - Every forwarded event has a typed [`Delivery`] outcome
//! - Substrates are interchangeable behind [`Transport`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use overlay_relay::{
//!     ClientOptions, HostConnector, OverlayConnector, RelayServer, Result, ServerOptions,
//!     WsTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = RelayServer::start(ServerOptions::default()).await?;
//!     let transport = |url: &str| -> Result<_> {
//!         Ok(Arc::new(WsTransport::new(ClientOptions::new(url)?)))
//!     };
//!
//!     let host = HostConnector::new(transport(&server.ws_url())?);
//!     let overlay = OverlayConnector::new(transport(&server.ws_url())?);
//!     host.start()?;
//!     overlay.start()?;
//!     host.wait_connected(Duration::from_secs(5)).await?;
//!     overlay.wait_connected(Duration::from_secs(5)).await?;
//!
//!     overlay.set_input_interceptable(true).await?;
//!     if let Some(delivery) = host.on_back_pressed().await {
//!         println!("back press: {delivery:?}");
//!     }
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connector`] | Client-side connectors: [`HostConnector`], [`OverlayConnector`] |
//! | [`contract`] | The four RPC traits |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`options`] | Service names and substrate configuration |
//! | [`protocol`] | Wire frames and the [`Delivery`] outcome |
//! | [`relay`] | The relay endpoint |
//! | [`transport`] | Loopback and WebSocket substrates |

// ============================================================================
// Modules
// ============================================================================

/// Client-side connectors.
///
/// - [`HostConnector`] - Used by the process owning the host surface
/// - [`OverlayConnector`] - Used by the process drawing the overlay
pub mod connector;

/// The four RPC surfaces of the relay.
pub mod contract;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for connections, binds and links.
pub mod identifiers;

/// Service names and substrate configuration.
pub mod options;

/// Wire protocol message types.
pub mod protocol;

/// The relay endpoint and its per-role sessions.
pub mod relay;

/// Transport layer.
///
/// Liveness, handles and the loopback and WebSocket substrates.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connector types
pub use connector::{HostConnector, InputHandler, OverlayConnector};

// Contract traits
pub use contract::{HostCallback, HostContract, OverlayCallback, OverlayContract};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{BindingId, CallId, ConnectionId, LinkId};

// Configuration
pub use options::{ClientOptions, RegistrationPolicy, RelayOptions, ServerOptions, ServiceName};

// Protocol types
pub use protocol::Delivery;

// Relay types
pub use relay::RelayEndpoint;

// Transport types
pub use transport::{
    BindAction, DeathNotifier, Liveness, LoopbackRelay, LoopbackTransport, RelayServer,
    RemoteHandle, ServiceConnection, ServiceHandle, Transport, WsTransport,
};
