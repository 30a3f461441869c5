//! One-shot death notification.
//!
//! A [`DeathNotifier`] is owned by whatever represents the remote end (a
//! loopback channel, a WebSocket connection). Observers hold a cloneable
//! [`Liveness`] and link recipients to it. Firing runs every linked
//! recipient exactly once; later fires are no-ops and later links fail.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::LinkId;

// ============================================================================
// Types
// ============================================================================

/// Callback run when the remote end dies.
pub type DeathRecipient = Box<dyn FnOnce() + Send>;

/// Shared notifier state.
#[derive(Default)]
struct NotifierState {
    /// Set once by [`DeathNotifier::fire`].
    dead: bool,
    /// Counter for link IDs.
    next_link: u64,
    /// Recipients still waiting for the death.
    recipients: FxHashMap<LinkId, DeathRecipient>,
}

// ============================================================================
// DeathNotifier
// ============================================================================

/// Owner side of a liveness link.
pub struct DeathNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl Default for DeathNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DeathNotifier {
    /// Creates a live notifier with no recipients.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NotifierState::default())),
        }
    }

    /// Returns an observer handle for this notifier.
    #[inline]
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        Liveness {
            state: Some(Arc::clone(&self.state)),
        }
    }

    /// Declares the remote end dead and runs every linked recipient.
    ///
    /// Recipients run on the calling thread, outside the notifier lock.
    /// Returns `false` if the notifier had already fired.
    pub fn fire(&self) -> bool {
        let recipients: Vec<DeathRecipient> = {
            let mut state = self.state.lock();
            if state.dead {
                return false;
            }
            state.dead = true;
            state.recipients.drain().map(|(_, r)| r).collect()
        };

        trace!(count = recipients.len(), "Delivering death notifications");
        for recipient in recipients {
            recipient();
        }
        true
    }

    /// Returns `true` once [`fire`](Self::fire) has run.
    #[inline]
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.state.lock().dead
    }

    /// Returns the number of recipients still linked.
    #[inline]
    #[must_use]
    pub fn linked_count(&self) -> usize {
        self.state.lock().recipients.len()
    }
}

impl fmt::Debug for DeathNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeathNotifier")
            .field("dead", &state.dead)
            .field("linked", &state.recipients.len())
            .finish()
    }
}

// ============================================================================
// Liveness
// ============================================================================

/// Observer side of a liveness link.
///
/// A local liveness (see [`Liveness::local`]) belongs to an in-process
/// object: it never dies and linking to it is a no-op.
#[derive(Clone, Default)]
pub struct Liveness {
    state: Option<Arc<Mutex<NotifierState>>>,
}

impl Liveness {
    /// Creates a liveness for an object that lives as long as the process.
    #[inline]
    #[must_use]
    pub const fn local() -> Self {
        Self { state: None }
    }

    /// Returns `true` until the owning notifier fires.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state.as_ref().is_none_or(|state| !state.lock().dead)
    }

    /// Links `recipient` to the remote end's death.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadObject`] if the remote end is already dead.
    /// The recipient is dropped without running.
    pub fn link(&self, recipient: DeathRecipient) -> Result<LinkId> {
        let Some(state) = &self.state else {
            return Ok(LinkId::new(0));
        };

        let mut state = state.lock();
        if state.dead {
            return Err(Error::DeadObject);
        }
        state.next_link += 1;
        let id = LinkId::new(state.next_link);
        state.recipients.insert(id, recipient);
        Ok(id)
    }

    /// Removes a linked recipient without running it.
    ///
    /// Returns `false` if the link is unknown or has already fired.
    pub fn unlink(&self, id: LinkId) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.lock().recipients.remove(&id).is_some())
    }
}

impl fmt::Debug for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            None => f.write_str("Liveness(local)"),
            Some(_) => f
                .debug_tuple("Liveness")
                .field(&if self.is_alive() { "alive" } else { "dead" })
                .finish(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_recipient(counter: &Arc<AtomicUsize>) -> DeathRecipient {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fire_runs_recipients_once() {
        let notifier = DeathNotifier::new();
        let liveness = notifier.liveness();
        let fired = Arc::new(AtomicUsize::new(0));

        liveness.link(counting_recipient(&fired)).expect("link");
        liveness.link(counting_recipient(&fired)).expect("link");

        assert!(notifier.fire());
        assert!(!notifier.fire());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_unlinked_recipient_not_run() {
        let notifier = DeathNotifier::new();
        let liveness = notifier.liveness();
        let fired = Arc::new(AtomicUsize::new(0));

        let id = liveness.link(counting_recipient(&fired)).expect("link");
        assert!(liveness.unlink(id));
        assert!(!liveness.unlink(id));

        notifier.fire();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_link_after_death_fails() {
        let notifier = DeathNotifier::new();
        notifier.fire();

        let result = notifier.liveness().link(Box::new(|| {}));
        assert!(matches!(result, Err(Error::DeadObject)));
    }

    #[test]
    fn test_local_never_dies() {
        let liveness = Liveness::local();
        assert!(liveness.is_alive());
        let id = liveness.link(Box::new(|| {})).expect("link");
        assert!(!liveness.unlink(id));
    }

    #[test]
    fn test_recipient_may_relink_elsewhere() {
        let first = DeathNotifier::new();
        let second = Arc::new(DeathNotifier::new());
        let second_liveness = second.liveness();

        first
            .liveness()
            .link(Box::new(move || {
                second_liveness.link(Box::new(|| {})).expect("relink");
            }))
            .expect("link");

        first.fire();
        assert_eq!(second.linked_count(), 1);
    }
}
