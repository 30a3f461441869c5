//! Client-side connectors.
//!
//! One connector per role, constructed once per process and cloned into
//! every caller.
//!
//! | Connector | Binds to | Registers |
//! |-----------|----------|-----------|
//! | [`HostConnector`] | `HostContract` | Flag receiver |
//! | [`OverlayConnector`] | `OverlayContract` | [`InputHandler`] adapter |
//!
//! Both share the same lifecycle: `start`/`stop` are refcounted, the
//! transport is bound on the first `start` and unbound on the last `stop`.

// ============================================================================
// Submodules
// ============================================================================

mod binding;
mod refcount;

/// Host-side connector.
pub mod host;

/// Overlay-side connector.
pub mod overlay;

// ============================================================================
// Re-exports
// ============================================================================

pub use host::HostConnector;
pub use overlay::{InputHandler, OverlayConnector};
