//! Handles to remote objects.
//!
//! A [`RemoteHandle`] pairs a callable target with the [`Liveness`] of the
//! channel it lives behind. A [`ServiceHandle`] is what a transport delivers
//! on connect: one of the two relay contracts, selected by bind action.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::contract::{HostContract, OverlayContract};

use super::BindAction;
use super::liveness::Liveness;

// ============================================================================
// RemoteHandle
// ============================================================================

/// Opaque reference to a remote interface with liveness notification.
///
/// Dereferences to the target, so contract methods are called directly on
/// the handle.
pub struct RemoteHandle<T: ?Sized> {
    /// Callable proxy or local object.
    target: Arc<T>,
    /// Liveness of the channel behind the target.
    liveness: Liveness,
}

impl<T: ?Sized> RemoteHandle<T> {
    /// Wraps a target that lives behind `liveness`.
    #[inline]
    #[must_use]
    pub fn new(target: Arc<T>, liveness: Liveness) -> Self {
        Self { target, liveness }
    }

    /// Wraps an in-process object.
    ///
    /// Substrates replace the local liveness with the channel's when the
    /// handle crosses a process boundary.
    #[inline]
    #[must_use]
    pub fn local(target: Arc<T>) -> Self {
        Self::new(target, Liveness::local())
    }

    /// Returns the wrapped target.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Returns the liveness of the channel behind the target.
    #[inline]
    #[must_use]
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Returns `true` while the channel is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Returns `true` if both handles wrap the same target object.
    #[inline]
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.target).cast::<()>() == Arc::as_ptr(&other.target).cast::<()>()
    }
}

impl<T: ?Sized> Clone for RemoteHandle<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            liveness: self.liveness.clone(),
        }
    }
}

impl<T: ?Sized> Deref for RemoteHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.target
    }
}

impl<T: ?Sized> fmt::Debug for RemoteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("target", &Arc::as_ptr(&self.target).cast::<()>())
            .field("liveness", &self.liveness)
            .finish()
    }
}

// ============================================================================
// ServiceHandle
// ============================================================================

/// The service a transport hands to a connection on connect.
#[derive(Clone)]
pub enum ServiceHandle {
    /// Relay contract for host-role clients.
    Host(RemoteHandle<dyn HostContract>),
    /// Relay contract for overlay-role clients.
    Overlay(RemoteHandle<dyn OverlayContract>),
}

impl ServiceHandle {
    /// Returns the action this service answers to.
    #[inline]
    #[must_use]
    pub const fn action(&self) -> BindAction {
        match self {
            Self::Host(_) => BindAction::Host,
            Self::Overlay(_) => BindAction::Overlay,
        }
    }

    /// Returns the liveness of the channel behind the service.
    #[inline]
    #[must_use]
    pub fn liveness(&self) -> &Liveness {
        match self {
            Self::Host(handle) => handle.liveness(),
            Self::Overlay(handle) => handle.liveness(),
        }
    }

    /// Narrows to the host contract.
    #[inline]
    #[must_use]
    pub fn into_host(self) -> Option<RemoteHandle<dyn HostContract>> {
        match self {
            Self::Host(handle) => Some(handle),
            Self::Overlay(_) => None,
        }
    }

    /// Narrows to the overlay contract.
    #[inline]
    #[must_use]
    pub fn into_overlay(self) -> Option<RemoteHandle<dyn OverlayContract>> {
        match self {
            Self::Overlay(handle) => Some(handle),
            Self::Host(_) => None,
        }
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("action", &self.action())
            .field("liveness", self.liveness())
            .finish()
    }
}
