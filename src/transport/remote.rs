//! Contract proxies and dispatchers over a [`Connection`].
//!
//! | Side | Calls out through | Serves with |
//! |------|-------------------|-------------|
//! | Client | `RemoteHostContract`, `RemoteOverlayContract` | `ClientDispatcher` |
//! | Relay | `RemoteHostCallback`, `RemoteOverlayCallback` | `RelayDispatcher` |
//!
//! Each connection carries at most one callback per direction, so a callback
//! is identified by the connection it was registered over.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, from_value, to_value};
use tracing::trace;

use crate::contract::{HostCallback, HostContract, OverlayCallback, OverlayContract};
use crate::error::{Error, Result};
use crate::protocol::{Call, CallTarget, Delivery};
use crate::relay::RelayEndpoint;

use super::BindAction;
use super::connection::{CallDispatcher, Connection};
use super::handle::{RemoteHandle, ServiceHandle};

// ============================================================================
// Client Side
// ============================================================================

/// Local callbacks a client serves to the relay.
#[derive(Default)]
pub(crate) struct ClientDispatcher {
    host: RwLock<Option<Arc<dyn HostCallback>>>,
    overlay: RwLock<Option<Arc<dyn OverlayCallback>>>,
}

impl ClientDispatcher {
    fn host(&self) -> Result<Arc<dyn HostCallback>> {
        self.host
            .read()
            .clone()
            .ok_or_else(|| Error::protocol("No host callback registered"))
    }

    fn overlay(&self) -> Result<Arc<dyn OverlayCallback>> {
        self.overlay
            .read()
            .clone()
            .ok_or_else(|| Error::protocol("No overlay callback registered"))
    }
}

#[async_trait]
impl CallDispatcher for ClientDispatcher {
    async fn dispatch(&self, call: Call) -> Result<Value> {
        match call {
            Call::PushInputInterceptable { enabled } => {
                self.host()?.set_input_interceptable(enabled).await?;
                Ok(Value::Null)
            }
            Call::DeliverBackPressed => {
                let handled = self.overlay()?.on_overlay_back_pressed().await?;
                Ok(Value::Bool(handled))
            }
            Call::DeliverScrolled {
                scroll_x,
                scrolling,
            } => {
                self.overlay()?
                    .on_overlay_scrolled(scroll_x, scrolling)
                    .await?;
                Ok(Value::Null)
            }
            other => Err(Error::unknown_method(other.method())),
        }
    }
}

/// Builds the service handle a client receives after the bind handshake.
pub(crate) fn client_service(
    action: BindAction,
    connection: &Connection,
    callbacks: Arc<ClientDispatcher>,
) -> ServiceHandle {
    let liveness = connection.liveness().clone();
    match action {
        BindAction::Host => ServiceHandle::Host(RemoteHandle::new(
            Arc::new(RemoteHostContract {
                connection: connection.clone(),
                callbacks,
            }),
            liveness,
        )),
        BindAction::Overlay => ServiceHandle::Overlay(RemoteHandle::new(
            Arc::new(RemoteOverlayContract {
                connection: connection.clone(),
                callbacks,
            }),
            liveness,
        )),
    }
}

/// Client proxy for the relay's host contract.
struct RemoteHostContract {
    connection: Connection,
    callbacks: Arc<ClientDispatcher>,
}

#[async_trait]
impl HostContract for RemoteHostContract {
    async fn register_host_callback(&self, callback: RemoteHandle<dyn HostCallback>) -> Result<()> {
        *self.callbacks.host.write() = Some(Arc::clone(callback.target()));
        self.connection.call(Call::RegisterHostCallback).await?;
        Ok(())
    }

    async fn unregister_host_callback(
        &self,
        _callback: RemoteHandle<dyn HostCallback>,
    ) -> Result<()> {
        let result = self.connection.call(Call::UnregisterHostCallback).await;
        self.callbacks.host.write().take();
        result.map(|_| ())
    }

    async fn on_overlay_back_pressed(&self) -> Result<Delivery<bool>> {
        let value = self.connection.call(Call::OverlayBackPressed).await?;
        Ok(from_value(value)?)
    }

    async fn on_overlay_scrolled(&self, scroll_x: i32, scrolling: bool) -> Result<Delivery<()>> {
        let value = self
            .connection
            .call(Call::OverlayScrolled {
                scroll_x,
                scrolling,
            })
            .await?;
        Ok(from_value(value)?)
    }
}

/// Client proxy for the relay's overlay contract.
struct RemoteOverlayContract {
    connection: Connection,
    callbacks: Arc<ClientDispatcher>,
}

#[async_trait]
impl OverlayContract for RemoteOverlayContract {
    async fn register_overlay_callback(
        &self,
        callback: RemoteHandle<dyn OverlayCallback>,
    ) -> Result<()> {
        *self.callbacks.overlay.write() = Some(Arc::clone(callback.target()));
        self.connection.call(Call::RegisterOverlayCallback).await?;
        Ok(())
    }

    async fn unregister_overlay_callback(
        &self,
        _callback: RemoteHandle<dyn OverlayCallback>,
    ) -> Result<()> {
        let result = self.connection.call(Call::UnregisterOverlayCallback).await;
        self.callbacks.overlay.write().take();
        result.map(|_| ())
    }

    async fn set_input_interceptable(&self, enabled: bool) -> Result<()> {
        self.connection
            .call(Call::SetInputInterceptable { enabled })
            .await?;
        Ok(())
    }
}

// ============================================================================
// Relay Side
// ============================================================================

/// Serves one client connection from the relay endpoint.
///
/// Only calls of the contract selected at bind time are accepted.
pub(crate) struct RelayDispatcher {
    endpoint: Arc<RelayEndpoint>,
    action: BindAction,
    connection: Connection,
}

impl RelayDispatcher {
    pub(crate) fn new(endpoint: Arc<RelayEndpoint>, action: BindAction, connection: Connection) -> Self {
        Self {
            endpoint,
            action,
            connection,
        }
    }

    fn host_callback(&self) -> RemoteHandle<dyn HostCallback> {
        RemoteHandle::new(
            Arc::new(RemoteHostCallback {
                connection: self.connection.clone(),
            }),
            self.connection.liveness().clone(),
        )
    }

    fn overlay_callback(&self) -> RemoteHandle<dyn OverlayCallback> {
        RemoteHandle::new(
            Arc::new(RemoteOverlayCallback {
                connection: self.connection.clone(),
            }),
            self.connection.liveness().clone(),
        )
    }

    fn accepts(&self, target: CallTarget) -> bool {
        matches!(
            (self.action, target),
            (BindAction::Host, CallTarget::Host) | (BindAction::Overlay, CallTarget::Overlay)
        )
    }
}

#[async_trait]
impl CallDispatcher for RelayDispatcher {
    async fn dispatch(&self, call: Call) -> Result<Value> {
        if !self.accepts(call.target()) {
            trace!(action = %self.action, method = call.method(), "Call outside bound contract");
            return Err(Error::unknown_method(call.method()));
        }

        let value = match call {
            Call::RegisterHostCallback => {
                self.endpoint
                    .register_host_callback(self.host_callback())
                    .await?;
                Value::Null
            }
            Call::UnregisterHostCallback => {
                self.endpoint
                    .unregister_host_callback(self.host_callback())
                    .await?;
                Value::Null
            }
            Call::OverlayBackPressed => to_value(self.endpoint.on_overlay_back_pressed().await?)?,
            Call::OverlayScrolled {
                scroll_x,
                scrolling,
            } => to_value(
                self.endpoint
                    .on_overlay_scrolled(scroll_x, scrolling)
                    .await?,
            )?,
            Call::RegisterOverlayCallback => {
                self.endpoint
                    .register_overlay_callback(self.overlay_callback())
                    .await?;
                Value::Null
            }
            Call::UnregisterOverlayCallback => {
                self.endpoint
                    .unregister_overlay_callback(self.overlay_callback())
                    .await?;
                Value::Null
            }
            Call::SetInputInterceptable { enabled } => {
                self.endpoint.set_input_interceptable(enabled).await?;
                Value::Null
            }
            other => return Err(Error::unknown_method(other.method())),
        };
        Ok(value)
    }
}

/// Relay proxy for a client's host callback.
struct RemoteHostCallback {
    connection: Connection,
}

#[async_trait]
impl HostCallback for RemoteHostCallback {
    async fn set_input_interceptable(&self, enabled: bool) -> Result<()> {
        self.connection
            .call(Call::PushInputInterceptable { enabled })
            .await?;
        Ok(())
    }
}

/// Relay proxy for a client's overlay callback.
struct RemoteOverlayCallback {
    connection: Connection,
}

#[async_trait]
impl OverlayCallback for RemoteOverlayCallback {
    async fn on_overlay_back_pressed(&self) -> Result<bool> {
        let value = self.connection.call(Call::DeliverBackPressed).await?;
        Ok(from_value(value)?)
    }

    async fn on_overlay_scrolled(&self, scroll_x: i32, scrolling: bool) -> Result<()> {
        self.connection
            .call(Call::DeliverScrolled {
                scroll_x,
                scrolling,
            })
            .await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
