//! Transport layer.
//!
//! This module defines how a connector reaches the relay and how liveness of
//! the remote end is observed. The relay and the connectors only see the
//! [`Transport`] and [`ServiceConnection`] traits; two substrates implement
//! them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Host process   │         bind(HOST)           │  Relay process  │
//! │  HostConnector  │◄────────────────────────────►│  RelayEndpoint  │
//! └─────────────────┘                              │                 │
//! ┌─────────────────┐         bind(OVERLAY)        │  host session   │
//! │ Overlay process │◄────────────────────────────►│  overlay session│
//! │OverlayConnector │                              │  interceptable  │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Binding Lifecycle
//!
//! 1. `Transport::bind` - Request a channel to the action's contract
//! 2. `ServiceConnection::on_service_connected` - Delivered on a transport task
//! 3. Calls flow through the delivered [`RemoteHandle`]
//! 4. Channel death fires every [`Liveness`] link made through it
//! 5. `Transport::unbind` - Release the channel
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `liveness` | One-shot death notification |
//! | `handle` | Remote and service handles |
//! | `loopback` | In-process substrate with failure injection |
//! | `connection` | WebSocket connection and event loop |
//! | `remote` | Contract proxies and dispatchers over a connection |
//! | `server` | WebSocket relay server |
//! | `client` | WebSocket client transport |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::BindingId;

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket client transport.
pub mod client;

/// WebSocket connection and event loop.
pub mod connection;

/// Remote and service handles.
pub mod handle;

/// One-shot death notification.
pub mod liveness;

/// In-process substrate.
pub mod loopback;

/// Contract proxies and dispatchers.
pub mod remote;

/// WebSocket relay server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::WsTransport;
pub use connection::{CallDispatcher, Connection};
pub use handle::{RemoteHandle, ServiceHandle};
pub use liveness::{DeathNotifier, DeathRecipient, Liveness};
pub use loopback::{LoopbackCounters, LoopbackRelay, LoopbackTransport};
pub use server::RelayServer;

// ============================================================================
// BindAction
// ============================================================================

/// Logical endpoint a client binds to.
///
/// The relay exposes one action per role; a host-role client can only reach
/// the host contract and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindAction {
    /// The host contract.
    Host,
    /// The overlay contract.
    Overlay,
}

impl BindAction {
    /// Returns the role name used in logs and errors.
    #[inline]
    #[must_use]
    pub const fn role(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Overlay => "overlay",
        }
    }
}

impl fmt::Display for BindAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role())
    }
}

// ============================================================================
// ServiceConnection
// ============================================================================

/// Receives connect and disconnect notifications for one bind.
///
/// Notifications arrive on a transport task, never inside
/// [`Transport::bind`] itself.
#[async_trait]
pub trait ServiceConnection: Send + Sync {
    /// The channel is up and `service` is callable.
    async fn on_service_connected(&self, service: ServiceHandle);

    /// The channel was lost while still bound.
    ///
    /// Not delivered for channels released through [`Transport::unbind`].
    async fn on_service_disconnected(&self);
}

// ============================================================================
// Transport
// ============================================================================

/// Reaches the relay across the process boundary.
pub trait Transport: Send + Sync {
    /// Requests a channel to the contract behind `action`.
    ///
    /// Returns immediately; `connection` is notified once the channel is up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindFailed`] if the request cannot be issued.
    ///
    /// [`Error::BindFailed`]: crate::Error::BindFailed
    fn bind(&self, action: BindAction, connection: Arc<dyn ServiceConnection>)
    -> Result<BindingId>;

    /// Releases a channel. Unknown IDs are ignored.
    fn unbind(&self, binding: BindingId);
}
