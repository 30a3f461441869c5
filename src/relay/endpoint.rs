//! The relay endpoint.
//!
//! Serves [`HostContract`] and [`OverlayContract`] from one object. It keeps
//! one session per role and the interceptable flag, and forwards host events
//! to whichever overlay session is registered.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace, warn};

use crate::contract::{HostCallback, HostContract, OverlayCallback, OverlayContract};
use crate::error::Result;
use crate::options::RelayOptions;
use crate::protocol::Delivery;
use crate::transport::{BindAction, RemoteHandle, ServiceHandle};

use super::session::SessionSlot;

// ============================================================================
// RelayEndpoint
// ============================================================================

/// Dual-contract relay service.
///
/// Substrates wrap it in their own proxies; [`service`](Self::service)
/// returns unwrapped in-process handles.
pub struct RelayEndpoint {
    options: RelayOptions,
    host: Arc<SessionSlot<dyn HostCallback>>,
    overlay: Arc<SessionSlot<dyn OverlayCallback>>,
    /// Held across the push to the host session, so a resync on register
    /// never overwrites a newer value.
    interceptable: AsyncMutex<bool>,
}

impl RelayEndpoint {
    /// Creates an endpoint with no sessions and the flag cleared.
    #[must_use]
    pub fn new(options: RelayOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            host: SessionSlot::new(BindAction::Host.role()),
            overlay: SessionSlot::new(BindAction::Overlay.role()),
            interceptable: AsyncMutex::new(false),
        })
    }

    /// Returns the endpoint configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Returns the contract selected by `action` as an in-process handle.
    #[must_use]
    pub fn service(self: &Arc<Self>, action: BindAction) -> ServiceHandle {
        match action {
            BindAction::Host => {
                let host: Arc<dyn HostContract> = Arc::clone(self) as Arc<dyn HostContract>;
                ServiceHandle::Host(RemoteHandle::local(host))
            }
            BindAction::Overlay => {
                let overlay: Arc<dyn OverlayContract> =
                    Arc::clone(self) as Arc<dyn OverlayContract>;
                ServiceHandle::Overlay(RemoteHandle::local(overlay))
            }
        }
    }

    /// Returns the stored interceptable flag.
    pub async fn input_interceptable(&self) -> bool {
        *self.interceptable.lock().await
    }

    /// Returns `true` if a host callback is registered.
    #[inline]
    #[must_use]
    pub fn has_host_session(&self) -> bool {
        self.host.is_active()
    }

    /// Returns `true` if an overlay callback is registered.
    #[inline]
    #[must_use]
    pub fn has_overlay_session(&self) -> bool {
        self.overlay.is_active()
    }
}

// ============================================================================
// HostContract
// ============================================================================

#[async_trait]
impl HostContract for RelayEndpoint {
    async fn register_host_callback(&self, callback: RemoteHandle<dyn HostCallback>) -> Result<()> {
        let flag = self.interceptable.lock().await;
        self.host
            .install(callback.clone(), self.options.registration)?;

        if let Err(e) = callback.set_input_interceptable(*flag).await {
            warn!(error = %e, enabled = *flag, "Flag resync to host failed");
        } else {
            debug!(enabled = *flag, "Flag resynced to host");
        }
        Ok(())
    }

    async fn unregister_host_callback(
        &self,
        callback: RemoteHandle<dyn HostCallback>,
    ) -> Result<()> {
        let matches = self.host.holds(&callback);
        if !self.host.clear() {
            debug!("Redundant host unregister");
        } else if !matches {
            debug!("Host unregister cleared a different callback");
        }
        Ok(())
    }

    async fn on_overlay_back_pressed(&self) -> Result<Delivery<bool>> {
        let Some(overlay) = self.overlay.current() else {
            debug!("Back press with no overlay session");
            return Ok(Delivery::NoPeer);
        };

        match overlay.on_overlay_back_pressed().await {
            Ok(handled) => {
                trace!(handled, "Back press delivered");
                Ok(Delivery::Delivered(handled))
            }
            Err(e) => {
                warn!(error = %e, "Back press forwarding failed");
                Ok(Delivery::Unreachable)
            }
        }
    }

    async fn on_overlay_scrolled(&self, scroll_x: i32, scrolling: bool) -> Result<Delivery<()>> {
        let Some(overlay) = self.overlay.current() else {
            debug!(scroll_x, "Scroll with no overlay session");
            return Ok(Delivery::NoPeer);
        };

        match overlay.on_overlay_scrolled(scroll_x, scrolling).await {
            Ok(()) => {
                trace!(scroll_x, scrolling, "Scroll delivered");
                Ok(Delivery::Delivered(()))
            }
            Err(e) => {
                warn!(error = %e, scroll_x, "Scroll forwarding failed");
                Ok(Delivery::Unreachable)
            }
        }
    }
}

// ============================================================================
// OverlayContract
// ============================================================================

#[async_trait]
impl OverlayContract for RelayEndpoint {
    async fn register_overlay_callback(
        &self,
        callback: RemoteHandle<dyn OverlayCallback>,
    ) -> Result<()> {
        self.overlay.install(callback, self.options.registration)?;
        Ok(())
    }

    async fn unregister_overlay_callback(
        &self,
        callback: RemoteHandle<dyn OverlayCallback>,
    ) -> Result<()> {
        let matches = self.overlay.holds(&callback);
        if !self.overlay.clear() {
            debug!("Redundant overlay unregister");
        } else if !matches {
            debug!("Overlay unregister cleared a different callback");
        }
        Ok(())
    }

    async fn set_input_interceptable(&self, enabled: bool) -> Result<()> {
        let mut flag = self.interceptable.lock().await;
        *flag = enabled;
        debug!(enabled, "Interceptable flag set");

        if let Some(host) = self.host.current()
            && let Err(e) = host.set_input_interceptable(enabled).await
        {
            warn!(error = %e, enabled, "Flag push to host failed");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
