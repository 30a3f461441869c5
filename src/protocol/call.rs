//! Call definitions for every contract served over a connection.
//!
//! Methods follow `contract.methodName` format.
//!
//! | Contract | Direction | Methods |
//! |----------|-----------|---------|
//! | `host` | Host → Relay | `registerCallback`, `unregisterCallback`, `overlayBackPressed`, `overlayScrolled` |
//! | `overlay` | Overlay → Relay | `registerCallback`, `unregisterCallback`, `setInputInterceptable` |
//! | `hostCallback` | Relay → Host | `setInputInterceptable` |
//! | `overlayCallback` | Relay → Overlay | `backPressed`, `scrolled` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

// ============================================================================
// Call
// ============================================================================

/// A single remote invocation.
///
/// # Format
///
/// ```json
/// { "method": "host.overlayScrolled", "params": { "scrollX": 12, "scrolling": true } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Call {
    // ------------------------------------------------------------------------
    // HostContract
    // ------------------------------------------------------------------------
    /// Register the connection's host callback.
    #[serde(rename = "host.registerCallback")]
    RegisterHostCallback,

    /// Drop the host session.
    #[serde(rename = "host.unregisterCallback")]
    UnregisterHostCallback,

    /// Forward a back press to the overlay.
    #[serde(rename = "host.overlayBackPressed")]
    OverlayBackPressed,

    /// Forward a scroll to the overlay.
    #[serde(rename = "host.overlayScrolled")]
    OverlayScrolled {
        /// Horizontal scroll offset in pixels.
        #[serde(rename = "scrollX")]
        scroll_x: i32,
        /// Whether the gesture is still in progress.
        scrolling: bool,
    },

    // ------------------------------------------------------------------------
    // OverlayContract
    // ------------------------------------------------------------------------
    /// Register the connection's overlay callback.
    #[serde(rename = "overlay.registerCallback")]
    RegisterOverlayCallback,

    /// Drop the overlay session.
    #[serde(rename = "overlay.unregisterCallback")]
    UnregisterOverlayCallback,

    /// Set the relay's interceptable flag.
    #[serde(rename = "overlay.setInputInterceptable")]
    SetInputInterceptable {
        /// New flag value.
        enabled: bool,
    },

    // ------------------------------------------------------------------------
    // Host callback
    // ------------------------------------------------------------------------
    /// Push the interceptable flag to the host.
    #[serde(rename = "hostCallback.setInputInterceptable")]
    PushInputInterceptable {
        /// Current flag value.
        enabled: bool,
    },

    // ------------------------------------------------------------------------
    // Overlay callback
    // ------------------------------------------------------------------------
    /// Deliver a back press to the overlay's handler.
    #[serde(rename = "overlayCallback.backPressed")]
    DeliverBackPressed,

    /// Deliver a scroll to the overlay's handler.
    #[serde(rename = "overlayCallback.scrolled")]
    DeliverScrolled {
        /// Horizontal scroll offset in pixels.
        #[serde(rename = "scrollX")]
        scroll_x: i32,
        /// Whether the gesture is still in progress.
        scrolling: bool,
    },
}

// ============================================================================
// CallTarget
// ============================================================================

/// The contract a [`Call`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Served by the relay to host-role clients.
    Host,
    /// Served by the relay to overlay-role clients.
    Overlay,
    /// Served by a host client to the relay.
    HostCallback,
    /// Served by an overlay client to the relay.
    OverlayCallback,
}

impl Call {
    /// Returns the contract this call belongs to.
    #[must_use]
    pub const fn target(&self) -> CallTarget {
        match self {
            Self::RegisterHostCallback
            | Self::UnregisterHostCallback
            | Self::OverlayBackPressed
            | Self::OverlayScrolled { .. } => CallTarget::Host,
            Self::RegisterOverlayCallback
            | Self::UnregisterOverlayCallback
            | Self::SetInputInterceptable { .. } => CallTarget::Overlay,
            Self::PushInputInterceptable { .. } => CallTarget::HostCallback,
            Self::DeliverBackPressed | Self::DeliverScrolled { .. } => CallTarget::OverlayCallback,
        }
    }

    /// Returns the wire method name.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::RegisterHostCallback => "host.registerCallback",
            Self::UnregisterHostCallback => "host.unregisterCallback",
            Self::OverlayBackPressed => "host.overlayBackPressed",
            Self::OverlayScrolled { .. } => "host.overlayScrolled",
            Self::RegisterOverlayCallback => "overlay.registerCallback",
            Self::UnregisterOverlayCallback => "overlay.unregisterCallback",
            Self::SetInputInterceptable { .. } => "overlay.setInputInterceptable",
            Self::PushInputInterceptable { .. } => "hostCallback.setInputInterceptable",
            Self::DeliverBackPressed => "overlayCallback.backPressed",
            Self::DeliverScrolled { .. } => "overlayCallback.scrolled",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
