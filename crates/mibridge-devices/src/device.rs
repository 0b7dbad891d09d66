//! [`Device`] – a physical device as seen by the bridge.
//!
//! Devices are owned by an external registry. The bridge only touches two
//! pieces of their state: the [`SequenceTracker`] during report dispatch and
//! the [`ListenerRegistry`] during command failover.

use std::fmt;
use std::sync::Arc;

use mibridge_types::{Did, Report};
use tracing::trace;

use crate::listeners::ListenerRegistry;
use crate::sequence::SequenceTracker;

/// Consumer of decoded, deduplicated reports for a device.
///
/// `gateway` is the id of the gateway the report arrived through.
pub trait ReportHandler: Send + Sync {
    fn on_report(&self, device: &Device, report: Report, gateway: &str);
}

impl<F> ReportHandler for F
where
    F: Fn(&Device, Report, &str) + Send + Sync,
{
    fn on_report(&self, device: &Device, report: Report, gateway: &str) {
        self(device, report, gateway)
    }
}

/// A device identified by its vendor `did`.
pub struct Device {
    did: Did,
    model: String,
    sequence: SequenceTracker,
    listeners: ListenerRegistry,
    handler: Arc<dyn ReportHandler>,
}

impl Device {
    /// Create a device whose reports are forwarded to `handler`.
    pub fn new(did: impl Into<Did>, model: impl Into<String>, handler: Arc<dyn ReportHandler>) -> Self {
        Self {
            did: did.into(),
            model: model.into(),
            sequence: SequenceTracker::new(),
            listeners: ListenerRegistry::new(),
            handler,
        }
    }

    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Vendor model / type tag, e.g. `"lumi.sensor_motion.v2"`.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Hand `report` to the device's handler, then fire every pending
    /// one-shot listener.
    pub fn on_report(&self, report: Report, gateway: &str) {
        self.handler.on_report(self, report, gateway);
        let fired = self.listeners.notify_all();
        if fired > 0 {
            trace!(did = %self.did, fired, "report confirmed pending listeners");
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("did", &self.did)
            .field("model", &self.model)
            .field("last_tid", &self.sequence.last())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
