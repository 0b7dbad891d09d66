//! [`CommandSender`] – outbound commands with a single failover hop.
//!
//! A command is published on the sender's own (primary) gateway. When
//! another available gateway also reaches the target device, the sender
//! waits up to the failover delay for *any* report from that device:
//!
//! ```text
//! SENT_PRIMARY ──► WAITING_CONFIRM ──► CONFIRMED
//!                         │
//!                         └─ timeout ─► TIMED_OUT ──► SENT_SECONDARY ──► DONE
//! ```
//!
//! Any report counts as confirmation, not only the response to this
//! command. When no secondary gateway exists the command is published once
//! and the sender returns immediately.

use std::sync::Arc;
use std::time::Duration;

use mibridge_devices::{Device, DeviceDirectory, Gateway};
use mibridge_types::{BridgeError, CommandData, CommandMethod, CommandPayload, TOPIC_COMMAND};
use tracing::{debug, instrument};

/// How a command left the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Published once; no secondary gateway was available.
    Direct,
    /// Published on the primary gateway and confirmed by a report in time.
    Confirmed,
    /// Unconfirmed on the primary gateway and replayed on `gateway`.
    FailedOver { gateway: String },
}

/// Sends commands through one primary gateway.
pub struct CommandSender {
    gateway: Arc<dyn Gateway>,
    directory: Arc<dyn DeviceDirectory>,
    failover_delay: Duration,
}

impl CommandSender {
    pub fn new(gateway: Arc<dyn Gateway>, directory: Arc<dyn DeviceDirectory>, failover_delay: Duration) -> Self {
        Self {
            gateway,
            directory,
            failover_delay,
        }
    }

    /// Send `method` with `data` to `device`.
    ///
    /// Publishes once or twice on [`TOPIC_COMMAND`], never more.
    ///
    /// # Errors
    ///
    /// Transport errors from either publish are returned unchanged;
    /// [`BridgeError::Serialization`] if the payload cannot be encoded.
    #[instrument(skip_all, fields(did = %device.did(), method = %method, gateway = %self.gateway.id()))]
    pub async fn send(
        &self,
        device: &Device,
        method: CommandMethod,
        data: &CommandData,
    ) -> Result<Delivery, BridgeError> {
        let payload = CommandPayload::build(device.did(), method, data).to_bytes()?;

        let Some(secondary) = self.secondary_for(device) else {
            self.gateway.publish(TOPIC_COMMAND, payload).await?;
            return Ok(Delivery::Direct);
        };
        self.publish_with_failover(device, secondary, payload).await
    }

    /// First available gateway reaching `device` other than the primary.
    fn secondary_for(&self, device: &Device) -> Option<Arc<dyn Gateway>> {
        self.directory
            .gateways_for(device.did())
            .into_iter()
            .find(|gw| gw.id() != self.gateway.id() && gw.is_available())
    }

    async fn publish_with_failover(
        &self,
        device: &Device,
        secondary: Arc<dyn Gateway>,
        payload: Vec<u8>,
    ) -> Result<Delivery, BridgeError> {
        // Registered before the publish so a fast report cannot slip past.
        // The guard deregisters on every exit path, including `?` below.
        let (guard, confirmed) = device.listeners().register();

        self.gateway.publish(TOPIC_COMMAND, payload.clone()).await?;

        let outcome = tokio::time::timeout(self.failover_delay, confirmed).await;
        drop(guard);

        if let Ok(Ok(())) = outcome {
            debug!("command confirmed on primary gateway");
            return Ok(Delivery::Confirmed);
        }

        debug!(
            secondary = %secondary.id(),
            delay_ms = self.failover_delay.as_millis() as u64,
            "no confirming report, replaying on secondary gateway"
        );
        secondary.publish(TOPIC_COMMAND, payload).await?;
        Ok(Delivery::FailedOver {
            gateway: secondary.id().to_string(),
        })
    }
}
