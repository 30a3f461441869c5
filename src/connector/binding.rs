//! Bind lifecycle shared by both connectors.
//!
//! A [`Binding`] owns one connector's relationship to the relay transport:
//! the caller refcount, the current bind, and the remote contract once the
//! transport delivers it.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──► bind(epoch) ──► on_service_connected ──► link death, register
//!                                     │
//!            on_service_disconnected ◄┴► death link fires
//!                     │                        │
//!              unregister, clear          clear remote
//! stop() at 1 → 0 ──► unlink, unbind
//! ```
//!
//! Every bind carries an epoch and every connect a sequence number.
//! Notifications tagged with an old epoch or sequence are ignored, so a late
//! delivery from a previous bind never clobbers the current one.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{BindingId, LinkId};
use crate::transport::{BindAction, RemoteHandle, ServiceConnection, ServiceHandle, Transport};

use super::refcount::{RefCount, Release};

// ============================================================================
// ConnectorRole
// ============================================================================

/// Role-specific half of a connector.
#[async_trait]
pub(crate) trait ConnectorRole: Send + Sync + 'static {
    /// Relay contract this role binds to.
    type Contract: ?Sized + Send + Sync + 'static;

    /// Bind action selecting [`Self::Contract`].
    const ACTION: BindAction;

    /// Extracts this role's contract from a delivered service.
    fn narrow(service: ServiceHandle) -> Option<RemoteHandle<Self::Contract>>;

    /// Registers the role's callback with the relay.
    async fn register(&self, contract: &RemoteHandle<Self::Contract>) -> Result<()>;

    /// Unregisters the role's callback from the relay.
    async fn unregister(&self, contract: &RemoteHandle<Self::Contract>) -> Result<()>;
}

// ============================================================================
// Types
// ============================================================================

/// A bind issued to the transport.
#[derive(Debug, Clone, Copy)]
struct ActiveBind {
    id: BindingId,
    epoch: u64,
}

/// A connected remote contract.
struct Remote<C: ?Sized> {
    handle: RemoteHandle<C>,
    link: Option<LinkId>,
    seq: u64,
}

/// Mutable binding state.
struct BindingState<C: ?Sized> {
    refs: RefCount,
    bind: Option<ActiveBind>,
    remote: Option<Remote<C>>,
    next_epoch: u64,
    next_seq: u64,
}

// ============================================================================
// Binding
// ============================================================================

/// One connector's bind lifecycle.
///
/// `start` and `stop` serialize on the state lock, so the refcount and the
/// bind check never race. Transport notifications take the same lock.
pub(crate) struct Binding<R: ConnectorRole> {
    transport: Arc<dyn Transport>,
    role: R,
    state: Mutex<BindingState<R::Contract>>,
    /// Published once registration completes.
    connected: watch::Sender<bool>,
}

impl<R: ConnectorRole> Binding<R> {
    /// Creates an unbound binding.
    pub(crate) fn new(transport: Arc<dyn Transport>, role: R) -> Arc<Self> {
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            transport,
            role,
            state: Mutex::new(BindingState {
                refs: RefCount::default(),
                bind: None,
                remote: None,
                next_epoch: 0,
                next_seq: 0,
            }),
            connected,
        })
    }

    /// Returns the role half.
    #[inline]
    pub(crate) fn role(&self) -> &R {
        &self.role
    }

    /// Adds a caller and binds if not connected.
    ///
    /// A bind left over from a lost connection is released and reissued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindFailed`] if the transport rejects the bind. The
    /// caller's count stays held and must still be released with `stop`.
    pub(crate) fn start(self: &Arc<Self>) -> Result<()> {
        let role = R::ACTION.role();
        let mut state = self.state.lock();
        state.refs.acquire();

        if state.remote.is_some() {
            trace!(role, refs = state.refs.get(), "Already connected");
            return Ok(());
        }

        if let Some(stale) = state.bind.take() {
            debug!(role, binding = %stale.id, "Releasing bind that never connected");
            self.transport.unbind(stale.id);
        }

        state.next_epoch += 1;
        let epoch = state.next_epoch;
        let connection: Arc<dyn ServiceConnection> = Arc::new(BindConnection::<R> {
            binding: Arc::downgrade(self),
            epoch,
        });

        match self.transport.bind(R::ACTION, connection) {
            Ok(id) => {
                state.bind = Some(ActiveBind { id, epoch });
                info!(role, binding = %id, epoch, refs = state.refs.get(), "Bind requested");
                Ok(())
            }
            Err(e) => {
                error!(role, error = %e, "Bind failed");
                Err(e)
            }
        }
    }

    /// Removes a caller and unbinds when the last one leaves.
    pub(crate) fn stop(&self) {
        let role = R::ACTION.role();
        let mut state = self.state.lock();

        match state.refs.release(role) {
            Release::Underflow => return,
            Release::Remaining(refs) => {
                debug!(role, refs, "Bind kept for remaining callers");
                return;
            }
            Release::Last => {}
        }

        // Unlink before unbinding: the transport may fire the death link
        // on this thread.
        if let Some(remote) = state.remote.take() {
            Self::unlink(&remote);
            self.connected.send_replace(false);
        }

        let Some(bind) = state.bind.take() else {
            debug!(role, "No bind to release");
            return;
        };
        self.transport.unbind(bind.id);
        info!(role, binding = %bind.id, "Unbound");
    }

    /// Returns the connected contract, if any.
    pub(crate) fn remote(&self) -> Option<RemoteHandle<R::Contract>> {
        self.state
            .lock()
            .remote
            .as_ref()
            .map(|remote| remote.handle.clone())
    }

    /// Returns `true` while a contract handle is held.
    #[inline]
    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().remote.is_some()
    }

    /// Returns `true` while a bind is outstanding.
    #[inline]
    pub(crate) fn is_bound(&self) -> bool {
        self.state.lock().bind.is_some()
    }

    /// Returns the number of callers holding interest.
    #[inline]
    pub(crate) fn ref_count(&self) -> usize {
        self.state.lock().refs.get()
    }

    /// Waits until the contract is connected and the callback registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionTimeout`] if `limit` elapses first.
    pub(crate) async fn wait_connected(&self, limit: Duration) -> Result<()> {
        let mut rx = self.connected.subscribe();
        timeout(limit, rx.wait_for(|connected| *connected))
            .await
            .map_err(|_| {
                Error::connection_timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
            })?
            .map(|_| ())
            .map_err(|_| Error::ConnectionClosed)
    }

    // ------------------------------------------------------------------------
    // Transport notifications
    // ------------------------------------------------------------------------

    async fn connected(self: Arc<Self>, epoch: u64, service: ServiceHandle) {
        let role = R::ACTION.role();
        let Some(contract) = R::narrow(service) else {
            error!(role, "Transport delivered the wrong contract");
            return;
        };

        let seq = {
            let mut state = self.state.lock();
            if !state.bind.is_some_and(|bind| bind.epoch == epoch) {
                debug!(role, epoch, "Stale connect ignored");
                return;
            }
            if let Some(previous) = state.remote.take() {
                Self::unlink(&previous);
            }

            state.next_seq += 1;
            let seq = state.next_seq;
            let binding: Weak<Self> = Arc::downgrade(&self);
            let link = match contract.liveness().link(Box::new(move || {
                if let Some(binding) = binding.upgrade() {
                    binding.service_died(seq);
                }
            })) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(role, error = %e, "Liveness link failed, continuing without death detection");
                    None
                }
            };

            state.remote = Some(Remote {
                handle: contract.clone(),
                link,
                seq,
            });
            seq
        };

        debug!(role, epoch, seq, "Service connected");
        if let Err(e) = self.role.register(&contract).await {
            warn!(role, error = %e, "Callback registration failed");
        }

        let current = self
            .state
            .lock()
            .remote
            .as_ref()
            .is_some_and(|remote| remote.seq == seq);
        if current {
            self.connected.send_replace(true);
            info!(role, epoch, "Connected");
        }
    }

    async fn disconnected(&self, epoch: u64) {
        let role = R::ACTION.role();
        let remote = {
            let mut state = self.state.lock();
            if !state.bind.is_some_and(|bind| bind.epoch == epoch) {
                debug!(role, epoch, "Stale disconnect ignored");
                return;
            }
            state.remote.take()
        };
        self.connected.send_replace(false);

        if let Some(remote) = remote {
            Self::unlink(&remote);
            if let Err(e) = self.role.unregister(&remote.handle).await {
                warn!(role, error = %e, "Unregister on disconnect failed");
            }
        }
        info!(role, epoch, "Service disconnected");
    }

    fn service_died(&self, seq: u64) {
        let role = R::ACTION.role();
        {
            let mut state = self.state.lock();
            if !state.remote.as_ref().is_some_and(|remote| remote.seq == seq) {
                trace!(role, seq, "Late death notification ignored");
                return;
            }
            state.remote = None;
        }
        self.connected.send_replace(false);
        warn!(role, seq, "Service died");
    }

    fn unlink(remote: &Remote<R::Contract>) {
        if let Some(link) = remote.link {
            remote.handle.liveness().unlink(link);
        }
    }
}

// ============================================================================
// BindConnection
// ============================================================================

/// Transport-facing notification sink for one bind.
struct BindConnection<R: ConnectorRole> {
    binding: Weak<Binding<R>>,
    epoch: u64,
}

#[async_trait]
impl<R: ConnectorRole> ServiceConnection for BindConnection<R> {
    async fn on_service_connected(&self, service: ServiceHandle) {
        if let Some(binding) = self.binding.upgrade() {
            binding.connected(self.epoch, service).await;
        }
    }

    async fn on_service_disconnected(&self) {
        if let Some(binding) = self.binding.upgrade() {
            binding.disconnected(self.epoch).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use proptest::prelude::*;
    use rustc_hash::FxHashMap;

    use crate::contract::OverlayContract;
    use crate::options::RelayOptions;
    use crate::relay::RelayEndpoint;
    use crate::transport::{DeathNotifier, Liveness};

    /// Records binds and delivers the overlay contract on a task.
    #[derive(Default)]
    struct CountingTransport {
        binds: AtomicUsize,
        unbinds: AtomicUsize,
        double_binds: AtomicUsize,
        fail: AtomicBool,
        deliver: AtomicBool,
        active: Mutex<FxHashMap<BindingId, Arc<DeathNotifier>>>,
    }

    impl CountingTransport {
        fn delivering() -> Arc<Self> {
            let transport = Self::default();
            transport.deliver.store(true, Ordering::SeqCst);
            Arc::new(transport)
        }

        fn active(&self) -> usize {
            self.active.lock().len()
        }

        fn kill_all(&self) {
            let notifiers: Vec<_> = self.active.lock().values().cloned().collect();
            for notifier in notifiers {
                notifier.fire();
            }
        }
    }

    impl Transport for CountingTransport {
        fn bind(
            &self,
            action: BindAction,
            connection: Arc<dyn ServiceConnection>,
        ) -> Result<BindingId> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::bind_failed(action, "refused"));
            }

            let id = BindingId::next();
            let notifier = Arc::new(DeathNotifier::new());
            let liveness = notifier.liveness();
            {
                let mut active = self.active.lock();
                if !active.is_empty() {
                    self.double_binds.fetch_add(1, Ordering::SeqCst);
                }
                active.insert(id, notifier);
            }
            self.binds.fetch_add(1, Ordering::SeqCst);

            if self.deliver.load(Ordering::SeqCst) {
                let endpoint = RelayEndpoint::new(RelayOptions::default());
                let service = match endpoint.service(action) {
                    ServiceHandle::Overlay(handle) => ServiceHandle::Overlay(RemoteHandle::new(
                        Arc::clone(handle.target()),
                        liveness,
                    )),
                    other => other,
                };
                tokio::spawn(async move { connection.on_service_connected(service).await });
            }
            Ok(id)
        }

        fn unbind(&self, binding: BindingId) {
            if let Some(notifier) = self.active.lock().remove(&binding) {
                self.unbinds.fetch_add(1, Ordering::SeqCst);
                notifier.fire();
            }
        }
    }

    #[derive(Default)]
    struct RecordingRole {
        registers: AtomicUsize,
        unregisters: AtomicUsize,
    }

    #[async_trait]
    impl ConnectorRole for RecordingRole {
        type Contract = dyn OverlayContract;

        const ACTION: BindAction = BindAction::Overlay;

        fn narrow(service: ServiceHandle) -> Option<RemoteHandle<dyn OverlayContract>> {
            service.into_overlay()
        }

        async fn register(&self, _contract: &RemoteHandle<dyn OverlayContract>) -> Result<()> {
            self.registers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unregister(&self, _contract: &RemoteHandle<dyn OverlayContract>) -> Result<()> {
            self.unregisters.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_two_callers_share_one_bind() {
        let transport = CountingTransport::delivering();
        let binding = Binding::new(transport.clone(), RecordingRole::default());

        binding.start().expect("start");
        binding.wait_connected(WAIT).await.expect("connected");
        binding.start().expect("start");

        binding.stop();
        assert!(binding.is_bound());
        assert_eq!(transport.unbinds.load(Ordering::SeqCst), 0);

        binding.stop();
        assert!(!binding.is_bound());
        assert!(!binding.is_connected());
        assert_eq!(transport.binds.load(Ordering::SeqCst), 1);
        assert_eq!(transport.unbinds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_rebinds_when_not_connected() {
        let transport = Arc::new(CountingTransport::default());
        let binding = Binding::new(transport.clone(), RecordingRole::default());

        binding.start().expect("start");
        binding.start().expect("start");

        assert_eq!(transport.binds.load(Ordering::SeqCst), 2);
        assert_eq!(transport.unbinds.load(Ordering::SeqCst), 1);
        assert_eq!(transport.active(), 1);
        assert_eq!(transport.double_binds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_before_connect_unbinds() {
        let transport = Arc::new(CountingTransport::default());
        let binding = Binding::new(transport.clone(), RecordingRole::default());

        binding.start().expect("start");
        binding.stop();

        assert_eq!(transport.active(), 0);
        assert_eq!(transport.unbinds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmatched_stop_ignored() {
        let transport = Arc::new(CountingTransport::default());
        let binding = Binding::new(transport.clone(), RecordingRole::default());

        binding.stop();
        assert_eq!(binding.ref_count(), 0);

        binding.start().expect("start");
        assert_eq!(binding.ref_count(), 1);
        assert_eq!(transport.active(), 1);
    }

    #[tokio::test]
    async fn test_bind_failure_keeps_count() {
        let transport = Arc::new(CountingTransport::default());
        transport.fail.store(true, Ordering::SeqCst);
        let binding = Binding::new(transport.clone(), RecordingRole::default());

        let result = binding.start();
        assert!(matches!(result, Err(Error::BindFailed { .. })));
        assert_eq!(binding.ref_count(), 1);
        assert!(!binding.is_bound());

        binding.stop();
        assert_eq!(binding.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_death_clears_remote_then_restart_rebinds() {
        let transport = CountingTransport::delivering();
        let binding = Binding::new(transport.clone(), RecordingRole::default());

        binding.start().expect("start");
        binding.wait_connected(WAIT).await.expect("connected");
        assert_eq!(binding.role().registers.load(Ordering::SeqCst), 1);

        transport.kill_all();
        assert!(!binding.is_connected());
        assert!(binding.is_bound());

        binding.start().expect("restart");
        binding.wait_connected(WAIT).await.expect("reconnected");
        assert_eq!(transport.binds.load(Ordering::SeqCst), 2);
        assert_eq!(transport.unbinds.load(Ordering::SeqCst), 1);
        assert_eq!(binding.ref_count(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_and_ignores_stale_epoch() {
        let transport = CountingTransport::delivering();
        let binding = Binding::new(transport.clone(), RecordingRole::default());

        binding.start().expect("start");
        binding.wait_connected(WAIT).await.expect("connected");

        binding.disconnected(0).await;
        assert!(binding.is_connected());

        binding.disconnected(1).await;
        assert!(!binding.is_connected());
        assert_eq!(binding.role().unregisters.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_connect_ignored() {
        let transport = Arc::new(CountingTransport::default());
        let binding = Binding::new(transport.clone(), RecordingRole::default());
        binding.start().expect("start");

        let endpoint = RelayEndpoint::new(RelayOptions::default());
        let service = ServiceHandle::Overlay(RemoteHandle::new(
            endpoint as Arc<dyn OverlayContract>,
            Liveness::local(),
        ));
        Arc::clone(&binding).connected(7, service).await;

        assert!(!binding.is_connected());
        assert_eq!(binding.role().registers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_connected_times_out() {
        let transport = Arc::new(CountingTransport::default());
        let binding = Binding::new(transport, RecordingRole::default());
        binding.start().expect("start");

        let result = binding.wait_connected(Duration::from_millis(20)).await;
        assert!(matches!(
            result,
            Err(Error::ConnectionTimeout { timeout_ms: 20 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_stop_never_double_binds() {
        const CALLERS: usize = 8;
        const ROUNDS: usize = 50;

        let transport = CountingTransport::delivering();
        let binding = Binding::new(transport.clone(), RecordingRole::default());

        let callers: Vec<_> = (0..CALLERS)
            .map(|_| {
                let binding = Arc::clone(&binding);
                tokio::spawn(async move {
                    for _ in 0..ROUNDS {
                        binding.start().expect("start");
                        tokio::task::yield_now().await;
                        binding.stop();
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.await.expect("caller");
        }

        assert_eq!(binding.ref_count(), 0);
        assert!(!binding.is_bound());
        assert_eq!(transport.double_binds.load(Ordering::SeqCst), 0);
        assert_eq!(
            transport.binds.load(Ordering::SeqCst),
            transport.unbinds.load(Ordering::SeqCst)
        );
        assert_eq!(transport.active(), 0);
    }

    proptest! {
        #[test]
        fn prop_binds_follow_net_count(ops in proptest::collection::vec(any::<bool>(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            runtime.block_on(async {
                let transport = CountingTransport::delivering();
                let binding = Binding::new(transport.clone(), RecordingRole::default());
                let mut net = 0usize;
                let mut rises = 0usize;
                let mut falls = 0usize;

                for start in ops {
                    if start {
                        binding.start().expect("start");
                        net += 1;
                        if net == 1 {
                            rises += 1;
                        }
                        binding.wait_connected(WAIT).await.expect("connected");
                    } else {
                        binding.stop();
                        if net > 0 {
                            net -= 1;
                            if net == 0 {
                                falls += 1;
                            }
                        }
                    }

                    prop_assert_eq!(transport.active(), usize::from(net > 0));
                    prop_assert_eq!(binding.ref_count(), net);
                }

                prop_assert_eq!(transport.binds.load(Ordering::SeqCst), rises);
                prop_assert_eq!(transport.unbinds.load(Ordering::SeqCst), falls);
                prop_assert_eq!(transport.double_binds.load(Ordering::SeqCst), 0);
                Ok(())
            })?;
        }
    }
}
