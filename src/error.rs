//! Error types for the overlay relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use overlay_relay::{HostConnector, Result};
//!
//! fn attach(host: &HostConnector) -> Result<()> {
//!     host.start()?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Binding | [`Error::BindFailed`], [`Error::DeadObject`], [`Error::SessionActive`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Delivery | [`Error::NoPeer`], [`Error::PeerUnreachable`] |
//! | Protocol | [`Error::UnknownMethod`], [`Error::Protocol`], [`Error::Remote`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::transport::BindAction;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when relay, server or client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Binding Errors
    // ========================================================================
    /// The transport could not establish a binding.
    #[error("Bind to {action} failed: {message}")]
    BindFailed {
        /// Action the bind was requested for.
        action: BindAction,
        /// Description of the failure.
        message: String,
    },

    /// The remote object is gone.
    ///
    /// Returned when linking to, or calling through, a dead handle.
    #[error("Remote object is dead")]
    DeadObject,

    /// A session is already registered for the role.
    ///
    /// Only returned under [`RegistrationPolicy::RejectWhileActive`].
    ///
    /// [`RegistrationPolicy::RejectWhileActive`]: crate::RegistrationPolicy::RejectWhileActive
    #[error("A {role} session is already registered")]
    SessionActive {
        /// Role whose session is occupied.
        role: &'static str,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timeout waiting for a connection or handshake.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while a call was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// No peer session is registered to receive a forwarded call.
    #[error("No peer registered for {operation}")]
    NoPeer {
        /// The forwarded operation.
        operation: &'static str,
    },

    /// The forwarding call failed after a peer session existed.
    #[error("Peer unreachable for {operation}")]
    PeerUnreachable {
        /// The forwarded operation.
        operation: &'static str,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Method not served on this connection.
    #[error("Unknown method: {method}")]
    UnknownMethod {
        /// The rejected method name.
        method: String,
    },

    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The remote side answered with an error response.
    #[error("Remote error ({code}): {message}")]
    Remote {
        /// Error code reported by the remote side.
        code: String,
        /// Error message reported by the remote side.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Relay URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a bind failure.
    #[inline]
    pub fn bind_failed(action: BindAction, message: impl Into<String>) -> Self {
        Self::BindFailed {
            action,
            message: message.into(),
        }
    }

    /// Creates a session-active error.
    #[inline]
    pub fn session_active(role: &'static str) -> Self {
        Self::SessionActive { role }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a no-peer error.
    #[inline]
    pub fn no_peer(operation: &'static str) -> Self {
        Self::NoPeer { operation }
    }

    /// Creates a peer-unreachable error.
    #[inline]
    pub fn peer_unreachable(operation: &'static str) -> Self {
        Self::PeerUnreachable { operation }
    }

    /// Creates an unknown method error.
    #[inline]
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a remote error from a response's code and message.
    #[inline]
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

impl Error {
    /// Returns the wire code used when this error is sent in a response.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::BindFailed { .. } => "bind failed",
            Self::DeadObject => "dead object",
            Self::SessionActive { .. } => "session active",
            Self::Connection { .. }
            | Self::ConnectionTimeout { .. }
            | Self::ConnectionClosed
            | Self::WebSocket(_) => "connection",
            Self::NoPeer { .. } => "no peer",
            Self::PeerUnreachable { .. } => "peer unreachable",
            Self::UnknownMethod { .. } => "unknown method",
            Self::Protocol { .. } | Self::Json(_) => "protocol",
            Self::Remote { .. } => "remote",
            Self::Io(_) | Self::Url(_) => "internal",
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::DeadObject
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if a forwarded call was not delivered.
    #[inline]
    #[must_use]
    pub fn is_delivery_error(&self) -> bool {
        matches!(self, Self::NoPeer { .. } | Self::PeerUnreachable { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed after the connector rebinds.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::DeadObject
                | Self::NoPeer { .. }
                | Self::PeerUnreachable { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_bind_failed_display() {
        let err = Error::bind_failed(BindAction::Host, "relay not found");
        assert_eq!(err.to_string(), "Bind to host failed: relay not found");
    }

    #[test]
    fn test_is_delivery_error() {
        assert!(Error::no_peer("overlayBackPressed").is_delivery_error());
        assert!(Error::peer_unreachable("overlayScrolled").is_delivery_error());
        assert!(!Error::DeadObject.is_delivery_error());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::connection_timeout(1000).is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::DeadObject.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::no_peer("overlayBackPressed").is_recoverable());
        assert!(!Error::config("test").is_recoverable());
        assert!(!Error::session_active("host").is_recoverable());
    }

    #[test]
    fn test_codes() {
        assert_eq!(Error::no_peer("x").code(), "no peer");
        assert_eq!(Error::unknown_method("x").code(), "unknown method");
        assert_eq!(Error::ConnectionClosed.code(), "connection");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
