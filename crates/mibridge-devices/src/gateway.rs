//! The [`Gateway`] trait – an addressable bus endpoint.
//!
//! The bridge never opens bus connections itself. Transport clients
//! implement this trait and register with a
//! [`DeviceRegistry`][crate::registry::DeviceRegistry]; the protocol core
//! only publishes through it.

use async_trait::async_trait;
use mibridge_types::BridgeError;

/// A gateway able to publish on the bus.
///
/// Several gateways may reach the same physical device.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Stable identifier for this gateway, e.g. `"gw-kitchen"`.
    fn id(&self) -> &str;

    /// Whether the gateway is currently connected and usable.
    fn is_available(&self) -> bool;

    /// Publish `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the transport rejects the
    /// publish. The bridge passes the error to its caller unchanged.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;
}
