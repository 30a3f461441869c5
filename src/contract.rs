//! The four RPC surfaces of the relay.
//!
//! | Trait | Served by | Called by |
//! |-------|-----------|-----------|
//! | [`HostContract`] | Relay | Host connector |
//! | [`OverlayContract`] | Relay | Overlay connector |
//! | [`HostCallback`] | Host connector | Relay |
//! | [`OverlayCallback`] | Overlay connector | Relay |
//!
//! Every substrate implements these traits with its own proxies, so the
//! relay and the connectors never see how a call crosses the process
//! boundary. A callback travels as a [`RemoteHandle`]: the substrate replaces
//! the caller's local liveness with that of the channel it was registered
//! over.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Delivery;
use crate::transport::RemoteHandle;

// ============================================================================
// Relay Contracts
// ============================================================================

/// Contract the relay serves to host-role clients.
#[async_trait]
pub trait HostContract: Send + Sync {
    /// Installs `callback` as the host session.
    ///
    /// The relay pushes its current interceptable flag to `callback`
    /// before this returns.
    async fn register_host_callback(&self, callback: RemoteHandle<dyn HostCallback>) -> Result<()>;

    /// Clears the host session, whichever callback it holds.
    async fn unregister_host_callback(
        &self,
        callback: RemoteHandle<dyn HostCallback>,
    ) -> Result<()>;

    /// Forwards a back press to the overlay session.
    async fn on_overlay_back_pressed(&self) -> Result<Delivery<bool>>;

    /// Forwards a scroll to the overlay session.
    async fn on_overlay_scrolled(&self, scroll_x: i32, scrolling: bool) -> Result<Delivery<()>>;
}

/// Contract the relay serves to overlay-role clients.
#[async_trait]
pub trait OverlayContract: Send + Sync {
    /// Installs `callback` as the overlay session.
    async fn register_overlay_callback(
        &self,
        callback: RemoteHandle<dyn OverlayCallback>,
    ) -> Result<()>;

    /// Clears the overlay session, whichever callback it holds.
    async fn unregister_overlay_callback(
        &self,
        callback: RemoteHandle<dyn OverlayCallback>,
    ) -> Result<()>;

    /// Sets the relay's interceptable flag and pushes it to the host session.
    async fn set_input_interceptable(&self, enabled: bool) -> Result<()>;
}

// ============================================================================
// Client Callbacks
// ============================================================================

/// Callback a host client registers with the relay.
#[async_trait]
pub trait HostCallback: Send + Sync {
    /// Receives the relay's interceptable flag.
    async fn set_input_interceptable(&self, enabled: bool) -> Result<()>;
}

/// Callback an overlay client registers with the relay.
#[async_trait]
pub trait OverlayCallback: Send + Sync {
    /// Handles a back press. Returns `true` if the overlay consumed it.
    async fn on_overlay_back_pressed(&self) -> Result<bool>;

    /// Handles a scroll of the host surface.
    async fn on_overlay_scrolled(&self, scroll_x: i32, scrolling: bool) -> Result<()>;
}
