//! [`BusGateway`] – a [`Gateway`] that publishes onto a [`LoopbackBus`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mibridge_devices::Gateway;
use mibridge_types::{BridgeError, BusMessage};
use tracing::trace;

use crate::bus::LoopbackBus;

/// Gateway backed by the in-process loopback bus.
///
/// Availability is a runtime flag, so tests and the CLI can take a gateway
/// offline without tearing the topology down.
#[derive(Debug)]
pub struct BusGateway {
    id: String,
    bus: LoopbackBus,
    available: AtomicBool,
}

impl BusGateway {
    /// Create an available gateway named `id` on `bus`.
    pub fn new(id: impl Into<String>, bus: LoopbackBus) -> Self {
        Self {
            id: id.into(),
            bus,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl Gateway for BusGateway {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] while the gateway is offline.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        if !self.is_available() {
            return Err(BridgeError::Transport {
                gateway: self.id.clone(),
                details: "gateway is offline".to_string(),
            });
        }
        let receivers = self.bus.publish(BusMessage::new(topic, payload));
        trace!(gateway = %self.id, topic, receivers, "published on loopback bus");
        Ok(())
    }
}
