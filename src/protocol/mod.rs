//! Relay protocol message types.
//!
//! This module defines the wire format spoken between clients (host and
//! overlay processes) and the relay over the WebSocket substrate, plus the
//! typed [`Delivery`] outcome shared by every substrate.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `bind` | Client → Relay | Select a contract by (package, action) |
//! | `bound` / `rejected` | Relay → Client | Handshake answer |
//! | `request` | Either | Remote invocation |
//! | `response` | Either | Invocation result |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `call` | Method catalogue for all four contracts |
//! | `delivery` | Forwarding outcome |
//! | `frame` | Frame, Request and Response types |

// ============================================================================
// Submodules
// ============================================================================

/// Method catalogue.
pub mod call;

/// Forwarding outcome.
pub mod delivery;

/// Frame, Request and Response message types.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use call::{Call, CallTarget};
pub use delivery::Delivery;
pub use frame::{Frame, Request, Response, ResponseStatus};
