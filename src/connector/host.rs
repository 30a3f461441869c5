//! Host-side connector.
//!
//! Binds to the relay's host contract, registers a callback that caches the
//! interceptable flag, and forwards local scroll and back events to the
//! overlay while that flag is set.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::contract::{HostCallback, HostContract};
use crate::error::Result;
use crate::protocol::Delivery;
use crate::transport::{BindAction, RemoteHandle, ServiceHandle, Transport};

use super::binding::{Binding, ConnectorRole};

// ============================================================================
// HostReceiver
// ============================================================================

/// The host's registered callback.
#[derive(Default)]
struct HostReceiver {
    /// Last value pushed by the relay.
    interceptable: AtomicBool,
}

#[async_trait]
impl HostCallback for HostReceiver {
    async fn set_input_interceptable(&self, enabled: bool) -> Result<()> {
        self.interceptable.store(enabled, Ordering::SeqCst);
        debug!(enabled, "Interceptable flag received");
        Ok(())
    }
}

// ============================================================================
// HostRole
// ============================================================================

struct HostRole {
    receiver: Arc<HostReceiver>,
}

impl HostRole {
    fn callback(&self) -> RemoteHandle<dyn HostCallback> {
        RemoteHandle::local(Arc::clone(&self.receiver) as Arc<dyn HostCallback>)
    }
}

#[async_trait]
impl ConnectorRole for HostRole {
    type Contract = dyn HostContract;

    const ACTION: BindAction = BindAction::Host;

    fn narrow(service: ServiceHandle) -> Option<RemoteHandle<dyn HostContract>> {
        service.into_host()
    }

    async fn register(&self, contract: &RemoteHandle<dyn HostContract>) -> Result<()> {
        contract.register_host_callback(self.callback()).await
    }

    async fn unregister(&self, contract: &RemoteHandle<dyn HostContract>) -> Result<()> {
        contract.unregister_host_callback(self.callback()).await
    }
}

// ============================================================================
// HostConnector
// ============================================================================

/// Connector used by host-process code.
///
/// Construct one at startup and clone it into every caller. Each caller
/// pairs [`start`](Self::start) with [`stop`](Self::stop); the bind is torn
/// down only when the last caller stops.
///
/// # Example
///
/// ```ignore
/// let host = HostConnector::new(transport);
/// host.start()?;
///
/// if let Some(delivery) = host.on_back_pressed().await
///     && delivery.is_handled()
/// {
///     return;
/// }
/// // handle locally
/// ```
#[derive(Clone)]
pub struct HostConnector {
    binding: Arc<Binding<HostRole>>,
}

impl HostConnector {
    /// Creates an unbound connector over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let role = HostRole {
            receiver: Arc::new(HostReceiver::default()),
        };
        Self {
            binding: Binding::new(transport, role),
        }
    }

    /// Adds a caller and binds to the relay if not connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindFailed`](crate::Error::BindFailed) if the
    /// transport rejects the bind.
    pub fn start(&self) -> Result<()> {
        self.binding.start()
    }

    /// Removes a caller; unbinds when none remain.
    pub fn stop(&self) {
        self.binding.stop();
    }

    /// Forwards a scroll to the overlay.
    ///
    /// Returns `None` without any remote call unless the cached flag is set
    /// and the relay is connected.
    pub async fn on_scrolled(&self, scroll_x: i32, scrolling: bool) -> Option<Delivery<()>> {
        let relay = self.gate("scroll")?;
        match relay.on_overlay_scrolled(scroll_x, scrolling).await {
            Ok(delivery) => Some(delivery),
            Err(e) => {
                warn!(error = %e, scroll_x, "Scroll forwarding failed");
                Some(Delivery::Unreachable)
            }
        }
    }

    /// Forwards a back press to the overlay.
    ///
    /// Returns `None` without any remote call unless the cached flag is set
    /// and the relay is connected. Fall back to local handling unless the
    /// result [`is_handled`](Delivery::is_handled).
    pub async fn on_back_pressed(&self) -> Option<Delivery<bool>> {
        let relay = self.gate("back press")?;
        match relay.on_overlay_back_pressed().await {
            Ok(delivery) => Some(delivery),
            Err(e) => {
                warn!(error = %e, "Back press forwarding failed");
                Some(Delivery::Unreachable)
            }
        }
    }

    /// Returns the last interceptable flag pushed by the relay.
    #[inline]
    #[must_use]
    pub fn is_input_interceptable(&self) -> bool {
        self.binding
            .role()
            .receiver
            .interceptable
            .load(Ordering::SeqCst)
    }

    /// Returns `true` while the relay contract is held.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.binding.is_connected()
    }

    /// Returns `true` while a bind is outstanding.
    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_bound()
    }

    /// Returns the number of callers holding the connector.
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.binding.ref_count()
    }

    /// Waits until connected and registered with the relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionTimeout`](crate::Error::ConnectionTimeout)
    /// if `limit` elapses first.
    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        self.binding.wait_connected(limit).await
    }

    fn gate(&self, event: &'static str) -> Option<RemoteHandle<dyn HostContract>> {
        if !self.is_input_interceptable() {
            trace!(event, "Not interceptable, event kept local");
            return None;
        }
        let relay = self.binding.remote();
        if relay.is_none() {
            trace!(event, "Relay not connected, event kept local");
        }
        relay
    }
}

impl std::fmt::Debug for HostConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConnector")
            .field("connected", &self.is_connected())
            .field("refs", &self.ref_count())
            .field("interceptable", &self.is_input_interceptable())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
