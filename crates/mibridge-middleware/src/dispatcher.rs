//! [`ReportDispatcher`] – delivers decoded reports to their devices.
//!
//! One bus delivery can carry property changes for many devices. The
//! dispatcher regroups them so every device's handler is called once per
//! delivery, in the order the devices first appear in the batch, with that
//! device's items in arrival order.
//!
//! Each item passes two filters before it is grouped:
//!
//! 1. its `did` must resolve through the [`DeviceDirectory`]; reports for
//!    unknown (e.g. recently removed) devices are dropped silently;
//! 2. its `tid`, when present, must differ from the device's last-seen
//!    sequence id; an equal `tid` marks a redundant delivery through another
//!    gateway and the item is dropped without touching the device.

use std::collections::HashMap;
use std::sync::Arc;

use mibridge_devices::{Device, DeviceDirectory};
use mibridge_types::{Did, EventReport, PropertyReport, Report, Tid};
use tracing::debug;

use crate::stats::ReportStats;

/// What happened to the items of one dispatch call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Report handler invocations (one per device).
    pub delivered: usize,
    /// Items dropped because their `tid` was already seen.
    pub duplicates: usize,
    /// Items dropped because their `did` did not resolve.
    pub unknown: usize,
}

/// Routes report items arriving through one gateway to their devices.
pub struct ReportDispatcher {
    gateway_id: String,
    directory: Arc<dyn DeviceDirectory>,
    stats: Option<Arc<dyn ReportStats>>,
}

impl ReportDispatcher {
    /// Create a dispatcher for reports arriving through `gateway_id`.
    pub fn new(gateway_id: impl Into<String>, directory: Arc<dyn DeviceDirectory>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            directory,
            stats: None,
        }
    }

    /// Emit a presence signal to `stats` before each handler invocation.
    pub fn with_stats(mut self, stats: Arc<dyn ReportStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Dispatch a property batch, calling each device's handler once with
    /// all of its surviving items.
    pub fn dispatch_properties(&self, items: Vec<PropertyReport>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut buckets: Vec<(Arc<Device>, Vec<PropertyReport>)> = Vec::new();
        let mut bucket_of: HashMap<Did, usize> = HashMap::new();

        for item in items {
            let Some(device) = self.admit(&item.did, item.tid.as_ref(), &mut summary) else {
                continue;
            };
            match bucket_of.get(&item.did) {
                Some(&index) => buckets[index].1.push(item),
                None => {
                    bucket_of.insert(item.did.clone(), buckets.len());
                    buckets.push((device, vec![item]));
                }
            }
        }

        for (device, items) in buckets {
            self.deliver(&device, Report::Properties(items));
            summary.delivered += 1;
        }
        summary
    }

    /// Dispatch a single event.
    pub fn dispatch_event(&self, item: EventReport) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if let Some(device) = self.admit(&item.did, item.tid.as_ref(), &mut summary) {
            self.deliver(&device, Report::Event(item));
            summary.delivered = 1;
        }
        summary
    }

    fn admit(&self, did: &Did, tid: Option<&Tid>, summary: &mut DispatchSummary) -> Option<Arc<Device>> {
        let Some(device) = self.directory.device(did) else {
            debug!(did = %did, gateway = %self.gateway_id, "report for unknown device dropped");
            summary.unknown += 1;
            return None;
        };
        if !device.sequence().observe(tid) {
            debug!(did = %did, tid = ?tid, gateway = %self.gateway_id, "duplicate report dropped");
            summary.duplicates += 1;
            return None;
        }
        Some(device)
    }

    fn deliver(&self, device: &Device, report: Report) {
        if let Some(stats) = &self.stats {
            stats.report_seen(device, &self.gateway_id);
        }
        device.on_report(report, &self.gateway_id);
    }
}
