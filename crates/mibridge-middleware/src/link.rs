//! [`MiotLink`] – one gateway's view of the protocol core.
//!
//! Inbound: bus message → [`decode`] → [`ReportDispatcher`] → device.
//! Outbound: caller → [`CommandSender`] → primary / failover publish.

use std::sync::Arc;
use std::time::Duration;

use mibridge_devices::{Device, DeviceDirectory, Gateway};
use mibridge_types::{BridgeError, BusMessage, CommandData, CommandMethod};
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::decoder::{Decoded, IgnoreReason, decode};
use crate::dispatcher::{DispatchSummary, ReportDispatcher};
use crate::sender::{CommandSender, Delivery};
use crate::stats::ReportStats;

/// Wait for a confirming report before failing over.
pub const DEFAULT_FAILOVER_DELAY: Duration = Duration::from_secs(1);

/// Tunables of a [`MiotLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub failover_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            failover_delay: DEFAULT_FAILOVER_DELAY,
        }
    }
}

/// Outcome of handling one inbound bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Dispatched(DispatchSummary),
    Ignored(IgnoreReason),
}

/// Inbound and outbound path of a single gateway.
pub struct MiotLink {
    dispatcher: ReportDispatcher,
    sender: CommandSender,
}

impl MiotLink {
    pub fn new(gateway: Arc<dyn Gateway>, directory: Arc<dyn DeviceDirectory>, config: LinkConfig) -> Self {
        Self {
            dispatcher: ReportDispatcher::new(gateway.id(), directory.clone()),
            sender: CommandSender::new(gateway, directory, config.failover_delay),
        }
    }

    /// Feed every dispatched report's presence signal to `stats`.
    pub fn with_stats(mut self, stats: Arc<dyn ReportStats>) -> Self {
        self.dispatcher = self.dispatcher.with_stats(stats);
        self
    }

    pub fn gateway_id(&self) -> &str {
        self.dispatcher.gateway_id()
    }

    /// Decode `message` and dispatch whatever it carries.
    pub fn handle_message(&self, message: &BusMessage) -> Handled {
        match decode(message) {
            Decoded::PropertyBatch(items) => Handled::Dispatched(self.dispatcher.dispatch_properties(items)),
            Decoded::Event(item) => Handled::Dispatched(self.dispatcher.dispatch_event(item)),
            Decoded::Ignored(reason) => {
                trace!(
                    topic = %message.topic,
                    received_at = %message.received_at,
                    ?reason,
                    "bus message ignored"
                );
                Handled::Ignored(reason)
            }
        }
    }

    /// Send a command to `device` through this link's gateway.
    pub async fn send(
        &self,
        device: &Device,
        method: CommandMethod,
        data: &CommandData,
    ) -> Result<Delivery, BridgeError> {
        self.sender.send(device, method, data).await
    }

    /// Handle every message from `receiver` until the bus closes.
    pub async fn serve(&self, mut receiver: broadcast::Receiver<BusMessage>) {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    self.handle_message(&message);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(gateway = %self.gateway_id(), lagged_by = n, "link lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackBus;
    use crate::bus_gateway::BusGateway;
    use crate::stats::ReportCounter;
    use mibridge_devices::DeviceRegistry;
    use mibridge_types::{Report, TOPIC_COMMAND, TOPIC_MIIO_REPORT};
    use serde_json::json;
    use std::sync::Mutex;

    fn link_with_device() -> (MiotLink, Arc<Mutex<Vec<Report>>>, Arc<ReportCounter>) {
        let seen: Arc<Mutex<Vec<Report>>> = Arc::default();
        let sink = seen.clone();
        let registry = Arc::new(DeviceRegistry::new());
        registry.register_device(Arc::new(Device::new(
            "1",
            "lumi.plug",
            Arc::new(move |_: &Device, r: Report, _: &str| sink.lock().unwrap().push(r)),
        )));
        let gateway = Arc::new(BusGateway::new("gw-a", LoopbackBus::default()));
        let counter = Arc::new(ReportCounter::new());
        let link = MiotLink::new(gateway, registry, LinkConfig::default()).with_stats(counter.clone());
        (link, seen, counter)
    }

    #[test]
    fn default_failover_delay_is_one_second() {
        assert_eq!(LinkConfig::default().failover_delay, Duration::from_secs(1));
    }

    #[test]
    fn handle_message_decodes_and_dispatches() {
        let (link, seen, counter) = link_with_device();
        let payload = json!({
            "method": "event_occured",
            "params": {"did": 1, "siid": 8, "eiid": 1, "tid": 5, "arguments": []}
        });
        let message = BusMessage::new(TOPIC_MIIO_REPORT, serde_json::to_vec(&payload).unwrap());

        let first = link.handle_message(&message);
        assert_eq!(first, Handled::Dispatched(DispatchSummary { delivered: 1, duplicates: 0, unknown: 0 }));
        let again = link.handle_message(&message);
        assert_eq!(again, Handled::Dispatched(DispatchSummary { delivered: 0, duplicates: 1, unknown: 0 }));

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(counter.total(), 1);
        assert_eq!(link.gateway_id(), "gw-a");
    }

    #[test]
    fn handle_message_reports_ignore_reason() {
        let (link, seen, _) = link_with_device();
        let message = BusMessage::new(TOPIC_COMMAND, b"{}".to_vec());
        assert_eq!(link.handle_message(&message), Handled::Ignored(IgnoreReason::UnhandledTopic));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn serve_handles_bus_traffic_until_closed() {
        let (link, seen, _) = link_with_device();
        let (tx, rx) = broadcast::channel(8);
        let payload = json!({
            "method": "properties_changed",
            "params": [{"did": "1", "siid": 2, "piid": 1, "value": false}]
        });
        tx.send(BusMessage::new(TOPIC_MIIO_REPORT, serde_json::to_vec(&payload).unwrap()))
            .unwrap();
        drop(tx);

        link.serve(rx).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
