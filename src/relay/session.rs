//! Per-role session slot.
//!
//! Holds at most one registered callback for a role, together with the
//! liveness link that clears it when the peer dies. Every install bumps a
//! generation number; a death notification only clears the slot if the
//! generation it was linked under is still current.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::LinkId;
use crate::options::RegistrationPolicy;
use crate::transport::RemoteHandle;

// ============================================================================
// Types
// ============================================================================

/// An installed session.
struct Session<T: ?Sized> {
    /// The registered callback.
    handle: RemoteHandle<T>,
    /// Death link, absent if linking failed.
    link: Option<LinkId>,
    /// Generation this session was installed under.
    generation: u64,
}

/// Mutable slot state.
struct SlotState<T: ?Sized> {
    current: Option<Session<T>>,
    generation: u64,
}

// ============================================================================
// SessionSlot
// ============================================================================

/// Single-occupant registration slot for one role.
pub(crate) struct SessionSlot<T: ?Sized> {
    /// Role name for logs and errors.
    role: &'static str,
    state: Mutex<SlotState<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> SessionSlot<T> {
    /// Creates an empty slot.
    pub(crate) fn new(role: &'static str) -> Arc<Self> {
        Arc::new(Self {
            role,
            state: Mutex::new(SlotState {
                current: None,
                generation: 0,
            }),
        })
    }

    /// Installs `handle` as the session and links it to the peer's death.
    ///
    /// Returns the generation of the new session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] under
    /// [`RegistrationPolicy::RejectWhileActive`] if a session is installed.
    pub(crate) fn install(
        self: &Arc<Self>,
        handle: RemoteHandle<T>,
        policy: RegistrationPolicy,
    ) -> Result<u64> {
        let mut state = self.state.lock();

        if state.current.is_some() && policy == RegistrationPolicy::RejectWhileActive {
            debug!(role = self.role, "Registration rejected, session active");
            return Err(Error::session_active(self.role));
        }

        state.generation += 1;
        let generation = state.generation;

        let slot: Weak<Self> = Arc::downgrade(self);
        let link = match handle.liveness().link(Box::new(move || {
            if let Some(slot) = slot.upgrade() {
                slot.clear_if(generation);
            }
        })) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(role = self.role, error = %e, "Liveness link failed, session has no death detection");
                None
            }
        };

        if let Some(previous) = state.current.replace(Session {
            handle,
            link,
            generation,
        }) {
            Self::detach(&previous);
            debug!(
                role = self.role,
                replaced = previous.generation,
                "Previous session replaced"
            );
        }

        info!(role = self.role, generation, "Session installed");
        Ok(generation)
    }

    /// Clears the session, whichever callback it holds.
    ///
    /// Returns `false` if no session was installed.
    pub(crate) fn clear(&self) -> bool {
        let Some(session) = self.state.lock().current.take() else {
            return false;
        };

        Self::detach(&session);
        info!(role = self.role, generation = session.generation, "Session cleared");
        true
    }

    /// Clears the session only if it is still at `generation`.
    ///
    /// Called from death notifications.
    pub(crate) fn clear_if(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        let matches = state
            .current
            .as_ref()
            .is_some_and(|session| session.generation == generation);

        if !matches {
            debug!(role = self.role, generation, "Stale death notification ignored");
            return false;
        }

        state.current = None;
        info!(role = self.role, generation, "Session cleared on peer death");
        true
    }

    /// Returns the current callback, if any.
    pub(crate) fn current(&self) -> Option<RemoteHandle<T>> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|session| session.handle.clone())
    }

    /// Returns `true` if a session is installed.
    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Returns `true` if the installed session wraps the same object as `handle`.
    pub(crate) fn holds(&self, handle: &RemoteHandle<T>) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|session| session.handle.same_target(handle))
    }

    fn detach(session: &Session<T>) {
        if let Some(link) = session.link {
            session.handle.liveness().unlink(link);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
