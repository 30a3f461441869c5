//! In-process transport substrate.
//!
//! Simulates the relay process and its client processes inside one tokio
//! runtime. Every bind opens a channel with its own [`DeathNotifier`]; the
//! contract handle and every callback registered over that channel share its
//! liveness, exactly as they would across a real process boundary.
//!
//! Failure injection:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`LoopbackTransport::kill`] | Client process dies: its channels fire, later binds fail |
//! | [`LoopbackRelay::kill`] | Relay dies: state dropped, channels fire, connections get `on_service_disconnected` |
//! | [`LoopbackRelay::restart`] | Fresh relay state, bound connections get `on_service_connected` again |
//!
//! # Example
//!
//! ```ignore
//! let relay = LoopbackRelay::new(RelayOptions::default());
//! let host = HostConnector::new(Arc::new(relay.transport()));
//! host.start()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tracing::{debug, info, trace};

use crate::contract::{HostCallback, HostContract, OverlayCallback, OverlayContract};
use crate::error::{Error, Result};
use crate::identifiers::BindingId;
use crate::options::RelayOptions;
use crate::protocol::Delivery;
use crate::relay::RelayEndpoint;

use super::handle::{RemoteHandle, ServiceHandle};
use super::liveness::{DeathNotifier, Liveness};
use super::{BindAction, ServiceConnection, Transport};

// ============================================================================
// LoopbackCounters
// ============================================================================

/// Snapshot of loopback activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackCounters {
    /// Successful binds since creation.
    pub binds: u64,
    /// Unbinds of known channels since creation.
    pub unbinds: u64,
    /// Channels currently bound.
    pub active_bindings: usize,
    /// Contract calls that reached the relay.
    pub relay_calls: u64,
}

/// Shared activity counters.
#[derive(Default)]
struct Stats {
    binds: AtomicU64,
    unbinds: AtomicU64,
    relay_calls: AtomicU64,
}

// ============================================================================
// Internal State
// ============================================================================

/// A simulated client process.
#[derive(Default)]
struct ClientProcess {
    dead: AtomicBool,
}

/// One bind's channel.
struct Channel {
    action: BindAction,
    notifier: DeathNotifier,
    connection: Arc<dyn ServiceConnection>,
    client: Arc<ClientProcess>,
}

/// Mutable relay process state.
#[derive(Default)]
struct RelayState {
    /// Relay endpoint, absent while the process is dead.
    endpoint: Option<Arc<RelayEndpoint>>,
    channels: FxHashMap<BindingId, Channel>,
}

/// The simulated relay process.
struct RelayProcess {
    options: RelayOptions,
    state: Mutex<RelayState>,
    stats: Arc<Stats>,
}

impl RelayProcess {
    /// Builds the proxied contract handle for a channel.
    fn service(&self, endpoint: &Arc<RelayEndpoint>, channel: &Channel) -> ServiceHandle {
        let liveness = channel.notifier.liveness();
        match channel.action {
            BindAction::Host => {
                let proxy = LoopbackHostContract {
                    endpoint: Arc::clone(endpoint),
                    liveness: liveness.clone(),
                    stats: Arc::clone(&self.stats),
                };
                ServiceHandle::Host(RemoteHandle::new(Arc::new(proxy), liveness))
            }
            BindAction::Overlay => {
                let proxy = LoopbackOverlayContract {
                    endpoint: Arc::clone(endpoint),
                    liveness: liveness.clone(),
                    stats: Arc::clone(&self.stats),
                };
                ServiceHandle::Overlay(RemoteHandle::new(Arc::new(proxy), liveness))
            }
        }
    }
}

/// Delivers a connect notification unless the channel died first.
fn deliver_connected(runtime: &Handle, connection: Arc<dyn ServiceConnection>, service: ServiceHandle) {
    runtime.spawn(async move {
        if !service.liveness().is_alive() {
            trace!("Channel died before connect delivery");
            return;
        }
        connection.on_service_connected(service).await;
    });
}

// ============================================================================
// LoopbackRelay
// ============================================================================

/// The simulated relay process.
///
/// Cloning yields another handle to the same process.
#[derive(Clone)]
pub struct LoopbackRelay {
    process: Arc<RelayProcess>,
}

impl LoopbackRelay {
    /// Starts a relay process with a fresh endpoint.
    #[must_use]
    pub fn new(options: RelayOptions) -> Self {
        let endpoint = RelayEndpoint::new(options.clone());
        Self {
            process: Arc::new(RelayProcess {
                options,
                state: Mutex::new(RelayState {
                    endpoint: Some(endpoint),
                    channels: FxHashMap::default(),
                }),
                stats: Arc::new(Stats::default()),
            }),
        }
    }

    /// Creates a new client process that reaches this relay.
    #[must_use]
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            relay: Arc::clone(&self.process),
            client: Arc::new(ClientProcess::default()),
        }
    }

    /// Returns the live endpoint, if the relay is running.
    #[must_use]
    pub fn endpoint(&self) -> Option<Arc<RelayEndpoint>> {
        self.process.state.lock().endpoint.clone()
    }

    /// Returns `true` while the relay process is running.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.process.state.lock().endpoint.is_some()
    }

    /// Returns a snapshot of the activity counters.
    #[must_use]
    pub fn counters(&self) -> LoopbackCounters {
        let stats = &self.process.stats;
        LoopbackCounters {
            binds: stats.binds.load(Ordering::SeqCst),
            unbinds: stats.unbinds.load(Ordering::SeqCst),
            active_bindings: self.process.state.lock().channels.len(),
            relay_calls: stats.relay_calls.load(Ordering::SeqCst),
        }
    }

    /// Kills the relay process.
    ///
    /// Relay state is dropped, every channel's death fires, and each bound
    /// connection receives `on_service_disconnected`. Bindings survive and
    /// reconnect on [`restart`](Self::restart).
    pub async fn kill(&self) {
        let (connections, notifiers): (Vec<Arc<dyn ServiceConnection>>, Vec<DeathNotifier>) = {
            let mut state = self.process.state.lock();
            if state.endpoint.take().is_none() {
                return;
            }
            state
                .channels
                .values_mut()
                .map(|channel| {
                    (
                        Arc::clone(&channel.connection),
                        std::mem::take(&mut channel.notifier),
                    )
                })
                .unzip()
        };

        info!(bound = connections.len(), "Loopback relay killed");
        for notifier in notifiers {
            notifier.fire();
        }

        for connection in connections {
            connection.on_service_disconnected().await;
        }
    }

    /// Restarts a killed relay with fresh state.
    ///
    /// Every still-bound connection receives `on_service_connected` again.
    /// No-op while the relay is running.
    pub async fn restart(&self) {
        let deliveries: Vec<(Arc<dyn ServiceConnection>, ServiceHandle)> = {
            let mut state = self.process.state.lock();
            if state.endpoint.is_some() {
                return;
            }

            let endpoint = RelayEndpoint::new(self.process.options.clone());
            state.endpoint = Some(Arc::clone(&endpoint));
            state
                .channels
                .values()
                .map(|channel| {
                    (
                        Arc::clone(&channel.connection),
                        self.process.service(&endpoint, channel),
                    )
                })
                .collect()
        };

        info!(bound = deliveries.len(), "Loopback relay restarted");

        for (connection, service) in deliveries {
            connection.on_service_connected(service).await;
        }
    }
}

// ============================================================================
// LoopbackTransport
// ============================================================================

/// A simulated client process bound to a [`LoopbackRelay`].
#[derive(Clone)]
pub struct LoopbackTransport {
    relay: Arc<RelayProcess>,
    client: Arc<ClientProcess>,
}

impl LoopbackTransport {
    /// Kills this client process.
    ///
    /// Every channel it opened dies; the relay sees the death through the
    /// liveness links of callbacks registered over them. Later binds fail.
    pub fn kill(&self) {
        self.client.dead.store(true, Ordering::SeqCst);

        let notifiers: Vec<DeathNotifier> = {
            let mut state = self.relay.state.lock();
            let ids: Vec<BindingId> = state
                .channels
                .iter()
                .filter(|(_, channel)| Arc::ptr_eq(&channel.client, &self.client))
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| state.channels.remove(id))
                .map(|channel| channel.notifier)
                .collect()
        };

        info!(channels = notifiers.len(), "Loopback client killed");
        for notifier in notifiers {
            notifier.fire();
        }
    }

    /// Returns `true` until [`kill`](Self::kill) is called.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.client.dead.load(Ordering::SeqCst)
    }
}

impl Transport for LoopbackTransport {
    fn bind(
        &self,
        action: BindAction,
        connection: Arc<dyn ServiceConnection>,
    ) -> Result<BindingId> {
        if !self.is_alive() {
            return Err(Error::bind_failed(action, "client process is dead"));
        }
        let runtime =
            Handle::try_current().map_err(|e| Error::bind_failed(action, e.to_string()))?;

        let id = BindingId::next();
        let channel = Channel {
            action,
            notifier: DeathNotifier::new(),
            connection: Arc::clone(&connection),
            client: Arc::clone(&self.client),
        };

        let service = {
            let mut state = self.relay.state.lock();
            let service = state
                .endpoint
                .as_ref()
                .map(|endpoint| self.relay.service(endpoint, &channel));
            state.channels.insert(id, channel);
            service
        };
        self.relay.stats.binds.fetch_add(1, Ordering::SeqCst);

        match service {
            Some(service) => {
                debug!(%action, binding = %id, "Loopback bind");
                deliver_connected(&runtime, connection, service);
            }
            None => debug!(%action, binding = %id, "Loopback bind pending relay restart"),
        }
        Ok(id)
    }

    fn unbind(&self, binding: BindingId) {
        let Some(channel) = self.relay.state.lock().channels.remove(&binding) else {
            trace!(%binding, "Unbind of unknown channel");
            return;
        };

        self.relay.stats.unbinds.fetch_add(1, Ordering::SeqCst);
        debug!(action = %channel.action, %binding, "Loopback unbind");
        channel.notifier.fire();
    }
}

// ============================================================================
// Contract Proxies
// ============================================================================

/// Fails with [`Error::DeadObject`] once the channel is dead.
#[inline]
fn ensure_alive(liveness: &Liveness) -> Result<()> {
    if liveness.is_alive() {
        Ok(())
    } else {
        Err(Error::DeadObject)
    }
}

/// Relay side of a host channel.
struct LoopbackHostContract {
    endpoint: Arc<RelayEndpoint>,
    liveness: Liveness,
    stats: Arc<Stats>,
}

impl LoopbackHostContract {
    fn enter(&self) -> Result<()> {
        ensure_alive(&self.liveness)?;
        self.stats.relay_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Rebinds a callback to this channel's liveness.
    fn import(&self, callback: RemoteHandle<dyn HostCallback>) -> RemoteHandle<dyn HostCallback> {
        let proxy = LoopbackHostCallback {
            target: Arc::clone(callback.target()),
            liveness: self.liveness.clone(),
        };
        RemoteHandle::new(Arc::new(proxy), self.liveness.clone())
    }
}

#[async_trait]
impl HostContract for LoopbackHostContract {
    async fn register_host_callback(&self, callback: RemoteHandle<dyn HostCallback>) -> Result<()> {
        self.enter()?;
        self.endpoint
            .register_host_callback(self.import(callback))
            .await
    }

    async fn unregister_host_callback(
        &self,
        callback: RemoteHandle<dyn HostCallback>,
    ) -> Result<()> {
        self.enter()?;
        self.endpoint
            .unregister_host_callback(self.import(callback))
            .await
    }

    async fn on_overlay_back_pressed(&self) -> Result<Delivery<bool>> {
        self.enter()?;
        self.endpoint.on_overlay_back_pressed().await
    }

    async fn on_overlay_scrolled(&self, scroll_x: i32, scrolling: bool) -> Result<Delivery<()>> {
        self.enter()?;
        self.endpoint.on_overlay_scrolled(scroll_x, scrolling).await
    }
}

/// Relay side of an overlay channel.
struct LoopbackOverlayContract {
    endpoint: Arc<RelayEndpoint>,
    liveness: Liveness,
    stats: Arc<Stats>,
}

impl LoopbackOverlayContract {
    fn enter(&self) -> Result<()> {
        ensure_alive(&self.liveness)?;
        self.stats.relay_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn import(
        &self,
        callback: RemoteHandle<dyn OverlayCallback>,
    ) -> RemoteHandle<dyn OverlayCallback> {
        let proxy = LoopbackOverlayCallback {
            target: Arc::clone(callback.target()),
            liveness: self.liveness.clone(),
        };
        RemoteHandle::new(Arc::new(proxy), self.liveness.clone())
    }
}

#[async_trait]
impl OverlayContract for LoopbackOverlayContract {
    async fn register_overlay_callback(
        &self,
        callback: RemoteHandle<dyn OverlayCallback>,
    ) -> Result<()> {
        self.enter()?;
        self.endpoint
            .register_overlay_callback(self.import(callback))
            .await
    }

    async fn unregister_overlay_callback(
        &self,
        callback: RemoteHandle<dyn OverlayCallback>,
    ) -> Result<()> {
        self.enter()?;
        self.endpoint
            .unregister_overlay_callback(self.import(callback))
            .await
    }

    async fn set_input_interceptable(&self, enabled: bool) -> Result<()> {
        self.enter()?;
        self.endpoint.set_input_interceptable(enabled).await
    }
}

// ============================================================================
// Callback Proxies
// ============================================================================

/// Client side of a host callback, as seen from the relay.
struct LoopbackHostCallback {
    target: Arc<dyn HostCallback>,
    liveness: Liveness,
}

#[async_trait]
impl HostCallback for LoopbackHostCallback {
    async fn set_input_interceptable(&self, enabled: bool) -> Result<()> {
        ensure_alive(&self.liveness)?;
        self.target.set_input_interceptable(enabled).await
    }
}

/// Client side of an overlay callback, as seen from the relay.
struct LoopbackOverlayCallback {
    target: Arc<dyn OverlayCallback>,
    liveness: Liveness,
}

#[async_trait]
impl OverlayCallback for LoopbackOverlayCallback {
    async fn on_overlay_back_pressed(&self) -> Result<bool> {
        ensure_alive(&self.liveness)?;
        self.target.on_overlay_back_pressed().await
    }

    async fn on_overlay_scrolled(&self, scroll_x: i32, scrolling: bool) -> Result<()> {
        ensure_alive(&self.liveness)?;
        self.target.on_overlay_scrolled(scroll_x, scrolling).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc;

    /// Forwards notifications into a channel.
    struct Recorder {
        events: mpsc::UnboundedSender<Option<ServiceHandle>>,
    }

    #[async_trait]
    impl ServiceConnection for Recorder {
        async fn on_service_connected(&self, service: ServiceHandle) {
            let _ = self.events.send(Some(service));
        }

        async fn on_service_disconnected(&self) {
            let _ = self.events.send(None);
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Option<ServiceHandle>>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { events }), rx)
    }

    #[derive(Default)]
    struct CountingOverlay {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OverlayCallback for CountingOverlay {
        async fn on_overlay_back_pressed(&self) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn on_overlay_scrolled(&self, _scroll_x: i32, _scrolling: bool) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bind_delivers_selected_contract() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let transport = relay.transport();
        let (recorder, mut events) = recorder();

        transport.bind(BindAction::Overlay, recorder).expect("bind");
        let service = events.recv().await.flatten().expect("connected");

        assert_eq!(service.action(), BindAction::Overlay);
        assert!(service.liveness().is_alive());
        assert_eq!(relay.counters().binds, 1);
        assert_eq!(relay.counters().active_bindings, 1);
    }

    #[tokio::test]
    async fn test_unbind_kills_channel() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let transport = relay.transport();
        let (recorder, mut events) = recorder();

        let id = transport.bind(BindAction::Overlay, recorder).expect("bind");
        let overlay = events
            .recv()
            .await
            .flatten()
            .and_then(ServiceHandle::into_overlay)
            .expect("overlay");

        transport.unbind(id);
        transport.unbind(id);

        assert!(!overlay.is_alive());
        let result = overlay.set_input_interceptable(true).await;
        assert!(matches!(result, Err(Error::DeadObject)));

        let counters = relay.counters();
        assert_eq!(counters.unbinds, 1);
        assert_eq!(counters.active_bindings, 0);
        assert_eq!(counters.relay_calls, 0);
    }

    #[tokio::test]
    async fn test_client_kill_clears_relay_session() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let transport = relay.transport();
        let (recorder, mut events) = recorder();

        transport.bind(BindAction::Overlay, recorder.clone()).expect("bind");
        let overlay = events
            .recv()
            .await
            .flatten()
            .and_then(ServiceHandle::into_overlay)
            .expect("overlay");

        let callback: Arc<dyn OverlayCallback> = Arc::new(CountingOverlay::default());
        overlay
            .register_overlay_callback(RemoteHandle::local(callback))
            .await
            .expect("register");

        let endpoint = relay.endpoint().expect("endpoint");
        assert!(endpoint.has_overlay_session());

        transport.kill();
        assert!(!endpoint.has_overlay_session());
        assert!(transport.bind(BindAction::Overlay, recorder).is_err());
    }

    #[tokio::test]
    async fn test_relay_kill_and_restart() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let transport = relay.transport();
        let (recorder, mut events) = recorder();

        transport.bind(BindAction::Host, recorder).expect("bind");
        let first = events.recv().await.flatten().expect("connected");

        relay.kill().await;
        assert!(!relay.is_alive());
        assert!(!first.liveness().is_alive());
        assert!(events.recv().await.expect("event").is_none());

        relay.restart().await;
        let second = events.recv().await.flatten().expect("reconnected");
        assert!(second.liveness().is_alive());
        assert_eq!(relay.counters().active_bindings, 1);
    }

    #[test]
    fn test_bind_without_runtime_fails() {
        let relay = LoopbackRelay::new(RelayOptions::default());
        let transport = relay.transport();
        let (recorder, _events) = recorder();

        let result = transport.bind(BindAction::Host, recorder);
        assert!(matches!(result, Err(Error::BindFailed { .. })));
    }
}
