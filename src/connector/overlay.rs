//! Overlay-side connector.
//!
//! Binds to the relay's overlay contract, registers a callback that hands
//! forwarded host events to a local [`InputHandler`], and owns the
//! interceptable flag.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::contract::{OverlayCallback, OverlayContract};
use crate::error::Result;
use crate::transport::{BindAction, RemoteHandle, ServiceHandle, Transport};

use super::binding::{Binding, ConnectorRole};

// ============================================================================
// InputHandler
// ============================================================================

/// Receives host events forwarded to the overlay.
pub trait InputHandler: Send + Sync {
    /// Handles a back press. Returns `true` if the overlay consumed it.
    fn on_back_pressed(&self) -> bool;

    /// Handles a scroll of the host surface.
    fn on_scrolled(&self, scroll_x: i32, scrolling: bool);
}

// ============================================================================
// OverlayReceiver
// ============================================================================

/// The overlay's registered callback.
#[derive(Default)]
struct OverlayReceiver {
    handler: RwLock<Option<Arc<dyn InputHandler>>>,
}

impl OverlayReceiver {
    fn handler(&self) -> Option<Arc<dyn InputHandler>> {
        self.handler.read().clone()
    }
}

#[async_trait]
impl OverlayCallback for OverlayReceiver {
    async fn on_overlay_back_pressed(&self) -> Result<bool> {
        let Some(handler) = self.handler() else {
            trace!("Back press dropped, no input handler");
            return Ok(false);
        };
        Ok(handler.on_back_pressed())
    }

    async fn on_overlay_scrolled(&self, scroll_x: i32, scrolling: bool) -> Result<()> {
        match self.handler() {
            Some(handler) => handler.on_scrolled(scroll_x, scrolling),
            None => trace!(scroll_x, "Scroll dropped, no input handler"),
        }
        Ok(())
    }
}

// ============================================================================
// OverlayRole
// ============================================================================

struct OverlayRole {
    receiver: Arc<OverlayReceiver>,
    /// Last value requested through `set_input_interceptable`.
    ///
    /// Held across the relay call so setters reach the relay in order.
    requested: Mutex<bool>,
    /// Mirror of `requested` for synchronous reads.
    last: AtomicBool,
}

impl OverlayRole {
    fn callback(&self) -> RemoteHandle<dyn OverlayCallback> {
        RemoteHandle::local(Arc::clone(&self.receiver) as Arc<dyn OverlayCallback>)
    }
}

#[async_trait]
impl ConnectorRole for OverlayRole {
    type Contract = dyn OverlayContract;

    const ACTION: BindAction = BindAction::Overlay;

    fn narrow(service: ServiceHandle) -> Option<RemoteHandle<dyn OverlayContract>> {
        service.into_overlay()
    }

    async fn register(&self, contract: &RemoteHandle<dyn OverlayContract>) -> Result<()> {
        contract.register_overlay_callback(self.callback()).await
    }

    async fn unregister(&self, contract: &RemoteHandle<dyn OverlayContract>) -> Result<()> {
        contract.unregister_overlay_callback(self.callback()).await
    }
}

// ============================================================================
// OverlayConnector
// ============================================================================

/// Connector used by overlay-process code.
///
/// Construct one at startup and clone it into every caller. Lifecycle
/// matches [`HostConnector`](super::HostConnector).
#[derive(Clone)]
pub struct OverlayConnector {
    binding: Arc<Binding<OverlayRole>>,
}

impl OverlayConnector {
    /// Creates an unbound connector over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let role = OverlayRole {
            receiver: Arc::new(OverlayReceiver::default()),
            requested: Mutex::new(false),
            last: AtomicBool::new(false),
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

    /// Installs the handler for forwarded events, replacing any previous one.
    pub fn set_input_handler(&self, handler: Arc<dyn InputHandler>) {
        *self.binding.role().receiver.handler.write() = Some(handler);
    }

    /// Removes the handler. Later back presses report not handled.
    pub fn clear_input_handler(&self) {
        *self.binding.role().receiver.handler.write() = None;
    }

    /// Requests a new interceptable flag on the relay.
    ///
    /// A value equal to the last request is a no-op. The request is dropped
    /// if the relay is not connected, and is not replayed on a later
    /// connect. Returns `true` if the relay was called. Concurrent calls
    /// reach the relay in the order they took the flag.
    ///
    /// # Errors
    ///
    /// Returns the relay call's error. The request still counts as the
    /// last requested value.
    pub async fn set_input_interceptable(&self, enabled: bool) -> Result<bool> {
        let role = self.binding.role();
        let mut requested = role.requested.lock().await;
        if *requested == enabled {
            trace!(enabled, "Interceptable unchanged");
            return Ok(false);
        }
        *requested = enabled;
        role.last.store(enabled, Ordering::SeqCst);

        let Some(relay) = self.binding.remote() else {
            debug!(enabled, "Relay not connected, interceptable request dropped");
            return Ok(false);
        };

        relay.set_input_interceptable(enabled).await?;
        debug!(enabled, "Interceptable sent to relay");
        Ok(true)
    }

    /// Returns the last requested interceptable flag.
    #[inline]
    #[must_use]
    pub fn is_input_interceptable(&self) -> bool {
        self.binding.role().last.load(Ordering::SeqCst)
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
}

impl std::fmt::Debug for OverlayConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayConnector")
            .field("connected", &self.is_connected())
            .field("refs", &self.ref_count())
            .field("interceptable", &self.is_input_interceptable())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    use crate::contract::HostContract;
    use crate::identifiers::BindingId;
    use crate::options::RelayOptions;
    use crate::protocol::Delivery;
    use crate::transport::{LoopbackRelay, ServiceConnection};

    const WAIT: Duration = Duration::from_secs(1);

    #[derive(Default)]
    struct RecordingHandler {
        back_presses: AtomicUsize,
        last_scroll: AtomicI32,
    }

    impl InputHandler for RecordingHandler {
        fn on_back_pressed(&self) -> bool {
            self.back_presses.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn on_scrolled(&self, scroll_x: i32, _scrolling: bool) {
            self.last_scroll.store(scroll_x, Ordering::SeqCst);
        }
    }

    async fn connected_overlay(relay: &LoopbackRelay) -> OverlayConnector {
        let overlay = OverlayConnector::new(Arc::new(relay.transport()));
        overlay.start().expect("start");
        overlay.wait_connected(WAIT).await.expect("connected");
        overlay
    }

    #[tokio::test]
    async fn test_set_interceptable_is_idempotent() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let overlay = connected_overlay(&relay).await;
        let before = relay.counters().relay_calls;

        assert!(overlay.set_input_interceptable(true).await.expect("set"));
        assert!(!overlay.set_input_interceptable(true).await.expect("set"));
        assert_eq!(relay.counters().relay_calls, before + 1);

        let endpoint = relay.endpoint().expect("endpoint");
        assert!(endpoint.input_interceptable().await);
    }

    #[tokio::test]
    async fn test_request_dropped_while_disconnected() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let overlay = OverlayConnector::new(Arc::new(relay.transport()));

        assert!(!overlay.set_input_interceptable(true).await.expect("set"));
        assert!(overlay.is_input_interceptable());

        overlay.start().expect("start");
        overlay.wait_connected(WAIT).await.expect("connected");

        let endpoint = relay.endpoint().expect("endpoint");
        assert!(!endpoint.input_interceptable().await);
        assert!(!overlay.set_input_interceptable(true).await.expect("set"));
    }

    #[tokio::test]
    async fn test_handler_receives_forwarded_events() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let overlay = connected_overlay(&relay).await;
        let handler = Arc::new(RecordingHandler::default());
        overlay.set_input_handler(handler.clone());

        let endpoint = relay.endpoint().expect("endpoint");
        assert_eq!(
            endpoint.on_overlay_back_pressed().await.expect("call"),
            Delivery::Delivered(true)
        );
        endpoint.on_overlay_scrolled(42, true).await.expect("call");

        assert_eq!(handler.back_presses.load(Ordering::SeqCst), 1);
        assert_eq!(handler.last_scroll.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn test_no_handler_reports_not_handled() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let overlay = connected_overlay(&relay).await;
        overlay.set_input_handler(Arc::new(RecordingHandler::default()));
        overlay.clear_input_handler();

        let endpoint = relay.endpoint().expect("endpoint");
        assert_eq!(
            endpoint.on_overlay_back_pressed().await.expect("call"),
            Delivery::Delivered(false)
        );
    }

    /// Relay whose `set_input_interceptable(true)` answers late.
    #[derive(Default)]
    struct SlowRelay {
        flag: parking_lot::Mutex<bool>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OverlayContract for SlowRelay {
        async fn register_overlay_callback(
            &self,
            _callback: RemoteHandle<dyn OverlayCallback>,
        ) -> Result<()> {
            Ok(())
        }

        async fn unregister_overlay_callback(
            &self,
            _callback: RemoteHandle<dyn OverlayCallback>,
        ) -> Result<()> {
            Ok(())
        }

        async fn set_input_interceptable(&self, enabled: bool) -> Result<()> {
            if enabled {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            *self.flag.lock() = enabled;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowTransport(Arc<SlowRelay>);

    impl Transport for SlowTransport {
        fn bind(
            &self,
            _action: BindAction,
            connection: Arc<dyn ServiceConnection>,
        ) -> Result<BindingId> {
            let service = ServiceHandle::Overlay(RemoteHandle::local(
                Arc::clone(&self.0) as Arc<dyn OverlayContract>
            ));
            tokio::spawn(async move { connection.on_service_connected(service).await });
            Ok(BindingId::next())
        }

        fn unbind(&self, _binding: BindingId) {}
    }

    #[tokio::test]
    async fn test_concurrent_setters_reach_relay_in_order() {
        let relay = Arc::new(SlowRelay::default());
        let overlay = OverlayConnector::new(Arc::new(SlowTransport(Arc::clone(&relay))));
        overlay.start().expect("start");
        overlay.wait_connected(WAIT).await.expect("connected");

        let first = overlay.clone();
        let enable = tokio::spawn(async move { first.set_input_interceptable(true).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(overlay.set_input_interceptable(false).await.expect("disable"));
        assert!(enable.await.expect("join").expect("enable"));

        assert!(!overlay.is_input_interceptable());
        assert!(!*relay.flag.lock());
        assert_eq!(relay.calls.load(Ordering::SeqCst), 2);

        assert!(!overlay.set_input_interceptable(false).await.expect("repeat"));
        assert_eq!(relay.calls.load(Ordering::SeqCst), 2);
    }
}
