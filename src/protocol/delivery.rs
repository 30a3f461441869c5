//! Typed outcome of a forwarded call.
//!
//! The relay forwards host-originated events to whichever overlay session is
//! registered. The caller must be able to tell "nobody was there" apart from
//! "the peer vanished mid-call" and from "delivered, here is the answer".

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Delivery
// ============================================================================

/// Outcome of a call forwarded through the relay.
///
/// # Format
///
/// ```json
/// { "delivery": "delivered", "value": true }
/// { "delivery": "noPeer" }
/// { "delivery": "unreachable" }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "delivery", content = "value", rename_all = "camelCase")]
pub enum Delivery<T> {
    /// The peer received the call and answered.
    Delivered(T),
    /// No peer session was registered.
    NoPeer,
    /// A peer session existed but the call to it failed.
    Unreachable,
}

impl<T> Delivery<T> {
    /// Returns `true` if the peer received the call.
    #[inline]
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// Returns the peer's answer, if delivered.
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Delivered(value) => Some(value),
            Self::NoPeer | Self::Unreachable => None,
        }
    }

    /// Maps the delivered value.
    #[inline]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Delivery<U> {
        match self {
            Self::Delivered(value) => Delivery::Delivered(f(value)),
            Self::NoPeer => Delivery::NoPeer,
            Self::Unreachable => Delivery::Unreachable,
        }
    }

    /// Converts a non-delivery into an error.
    ///
    /// # Errors
    ///
    /// - [`Error::NoPeer`] for [`Delivery::NoPeer`]
    /// - [`Error::PeerUnreachable`] for [`Delivery::Unreachable`]
    pub fn into_result(self, operation: &'static str) -> Result<T> {
        match self {
            Self::Delivered(value) => Ok(value),
            Self::NoPeer => Err(Error::no_peer(operation)),
            Self::Unreachable => Err(Error::peer_unreachable(operation)),
        }
    }
}

impl Delivery<bool> {
    /// Returns `true` only if the peer received the event and consumed it.
    #[inline]
    #[must_use]
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Delivered(true))
    }
}

// ============================================================================
// Tests
// ============================================================================
