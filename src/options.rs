//! Relay, server and client configuration.
//!
//! Provides type-safe option values with `with_*` builder methods.
//!
//! # Example
//!
//! ```ignore
//! use overlay_relay::{ClientOptions, RegistrationPolicy, RelayOptions, ServiceName};
//!
//! let service = ServiceName::new("com.example.shell");
//! let relay = RelayOptions::new()
//!     .with_service(service.clone())
//!     .with_registration(RegistrationPolicy::RejectWhileActive);
//!
//! let client = ClientOptions::new("ws://127.0.0.1:7040")?.with_service(service);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::transport::BindAction;

// ============================================================================
// Constants
// ============================================================================

/// Package the relay publishes under by default.
pub const DEFAULT_PACKAGE: &str = "overlay.relay";

/// Default action suffix of the host contract.
const HOST_ACTION_SUFFIX: &str = "action.GET_HOST";

/// Default action suffix of the overlay contract.
const OVERLAY_ACTION_SUFFIX: &str = "action.GET_OVERLAY";

/// Default timeout for the WebSocket bind handshake.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ServiceName
// ============================================================================

/// Names the relay service: its package and one action per contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceName {
    /// Package that publishes the service.
    pub package: String,
    /// Action string selecting the host contract.
    pub host_action: String,
    /// Action string selecting the overlay contract.
    pub overlay_action: String,
}

impl Default for ServiceName {
    fn default() -> Self {
        Self::new(DEFAULT_PACKAGE)
    }
}

impl ServiceName {
    /// Creates a service name with actions derived from `package`.
    #[must_use]
    pub fn new(package: impl Into<String>) -> Self {
        let package = package.into();
        Self {
            host_action: format!("{package}.{HOST_ACTION_SUFFIX}"),
            overlay_action: format!("{package}.{OVERLAY_ACTION_SUFFIX}"),
            package,
        }
    }

    /// Sets the host action string.
    #[inline]
    #[must_use]
    pub fn with_host_action(mut self, action: impl Into<String>) -> Self {
        self.host_action = action.into();
        self
    }

    /// Sets the overlay action string.
    #[inline]
    #[must_use]
    pub fn with_overlay_action(mut self, action: impl Into<String>) -> Self {
        self.overlay_action = action.into();
        self
    }

    /// Returns the action string for `action`.
    #[inline]
    #[must_use]
    pub fn action(&self, action: BindAction) -> &str {
        match action {
            BindAction::Host => &self.host_action,
            BindAction::Overlay => &self.overlay_action,
        }
    }

    /// Resolves a (package, action) pair to the contract it selects.
    #[must_use]
    pub fn resolve(&self, package: &str, action: &str) -> Option<BindAction> {
        if package != self.package {
            return None;
        }
        if action == self.host_action {
            Some(BindAction::Host)
        } else if action == self.overlay_action {
            Some(BindAction::Overlay)
        } else {
            None
        }
    }

    /// Validates the service name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any part is empty or both actions match.
    pub fn validate(&self) -> Result<()> {
        if self.package.is_empty() {
            return Err(Error::config("Service package must not be empty"));
        }
        if self.host_action.is_empty() || self.overlay_action.is_empty() {
            return Err(Error::config("Service actions must not be empty"));
        }
        if self.host_action == self.overlay_action {
            return Err(Error::config(format!(
                "Host and overlay actions must differ (both are {:?})",
                self.host_action
            )));
        }
        Ok(())
    }
}

// ============================================================================
// RegistrationPolicy
// ============================================================================

/// What the relay does when a role registers while its session is occupied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistrationPolicy {
    /// Replace the previous session without revoking it.
    #[default]
    Replace,
    /// Fail with [`Error::SessionActive`] until the session is cleared.
    RejectWhileActive,
}

// ============================================================================
// RelayOptions
// ============================================================================

/// Configuration of a relay endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayOptions {
    /// Name the relay answers to.
    pub service: ServiceName,
    /// Re-registration behavior.
    pub registration: RegistrationPolicy,
}

impl RelayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[inline]
    #[must_use]
    pub fn with_service(mut self, service: ServiceName) -> Self {
        self.service = service;
        self
    }

    /// Sets the registration policy.
    #[inline]
    #[must_use]
    pub fn with_registration(mut self, registration: RegistrationPolicy) -> Self {
        self.registration = registration;
        self
    }
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Configuration of the WebSocket relay server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// IP address to listen on.
    pub ip: IpAddr,
    /// Port to listen on (0 for random).
    pub port: u16,
    /// Maximum time a client may take to send its bind frame.
    pub handshake_timeout: Duration,
    /// Relay endpoint configuration.
    pub relay: RelayOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            relay: RelayOptions::default(),
        }
    }
}

impl ServerOptions {
    /// Creates options listening on a random localhost port.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address.
    #[inline]
    #[must_use]
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = ip;
        self
    }

    /// Sets the listen port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the relay endpoint configuration.
    #[inline]
    #[must_use]
    pub fn with_relay(mut self, relay: RelayOptions) -> Self {
        self.relay = relay;
        self
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Configuration of the WebSocket client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Relay server URL (`ws://` or `wss://`).
    pub url: Url,
    /// Name of the service to bind to.
    pub service: ServiceName,
    /// Maximum time for connect plus bind handshake.
    pub connect_timeout: Duration,
}

impl ClientOptions {
    /// Creates options for the relay at `url`.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if `url` does not parse
    /// - [`Error::Config`] if the scheme is not `ws` or `wss`
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Relay URL must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            service: ServiceName::default(),
            connect_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Sets the service name.
    #[inline]
    #[must_use]
    pub fn with_service(mut self, service: ServiceName) -> Self {
        self.service = service;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        let service = ServiceName::default();
        assert_eq!(service.package, DEFAULT_PACKAGE);
        assert_eq!(service.host_action, "overlay.relay.action.GET_HOST");
        assert_eq!(service.overlay_action, "overlay.relay.action.GET_OVERLAY");
        assert!(service.validate().is_ok());
    }

    #[test]
    fn test_resolve() {
        let service = ServiceName::new("com.example");
        assert_eq!(
            service.resolve("com.example", "com.example.action.GET_HOST"),
            Some(BindAction::Host)
        );
        assert_eq!(
            service.resolve("com.example", &service.overlay_action),
            Some(BindAction::Overlay)
        );
        assert_eq!(service.resolve("com.other", &service.host_action), None);
        assert_eq!(service.resolve("com.example", "com.example.action.NOPE"), None);
    }

    #[test]
    fn test_validate_rejects_same_actions() {
        let service = ServiceName::new("pkg").with_overlay_action("pkg.action.GET_HOST");
        assert!(matches!(service.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_client_options_scheme() {
        assert!(ClientOptions::new("ws://127.0.0.1:9000").is_ok());
        assert!(matches!(
            ClientOptions::new("http://127.0.0.1:9000"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(ClientOptions::new("not a url"), Err(Error::Url(_))));
    }

    #[test]
    fn test_server_options_builder() {
        let options = ServerOptions::new()
            .with_port(7040)
            .with_handshake_timeout(Duration::from_secs(1))
            .with_relay(RelayOptions::new().with_registration(RegistrationPolicy::RejectWhileActive));

        assert_eq!(options.port, 7040);
        assert_eq!(options.handshake_timeout, Duration::from_secs(1));
        assert_eq!(options.relay.registration, RegistrationPolicy::RejectWhileActive);
    }
}
