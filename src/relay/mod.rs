//! Relay endpoint.
//!
//! The relay lives in its own process and brokers between one host session
//! and one overlay session.
//!
//! | Piece | Owns |
//! |-------|------|
//! | `RelayEndpoint` | Both contracts, the interceptable flag |
//! | `SessionSlot` | One role's callback and its death link |
//!
//! The endpoint is substrate-agnostic: the loopback relay and the WebSocket
//! server both host a [`RelayEndpoint`] behind their own proxies.

// ============================================================================
// Submodules
// ============================================================================

/// Dual-contract relay service.
pub mod endpoint;

mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use endpoint::RelayEndpoint;
