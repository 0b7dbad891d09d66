//! Report presence statistics.
//!
//! The dispatcher emits one [`ReportStats::report_seen`] signal per device
//! per delivery, right before the device's report handler runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use mibridge_devices::Device;
use mibridge_types::Did;

/// Receiver of the per-delivery presence signal.
pub trait ReportStats: Send + Sync {
    fn report_seen(&self, device: &Device, gateway: &str);
}

#[derive(Debug, Default)]
struct Counts {
    by_model: HashMap<String, u64>,
    by_device: HashMap<Did, u64>,
    by_gateway: HashMap<String, u64>,
}

/// Counts deliveries per device model, per device and per gateway.
#[derive(Debug, Default)]
pub struct ReportCounter {
    counts: Mutex<Counts>,
}

impl ReportCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model_count(&self, model: &str) -> u64 {
        self.lock().by_model.get(model).copied().unwrap_or(0)
    }

    pub fn device_count(&self, did: &Did) -> u64 {
        self.lock().by_device.get(did).copied().unwrap_or(0)
    }

    pub fn gateway_count(&self, gateway: &str) -> u64 {
        self.lock().by_gateway.get(gateway).copied().unwrap_or(0)
    }

    /// Total deliveries across all devices.
    pub fn total(&self) -> u64 {
        self.lock().by_device.values().sum()
    }

    /// `(model, count)` pairs sorted by model name.
    pub fn models(&self) -> Vec<(String, u64)> {
        let mut models: Vec<_> = self
            .lock()
            .by_model
            .iter()
            .map(|(model, n)| (model.clone(), *n))
            .collect();
        models.sort();
        models
    }

    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReportStats for ReportCounter {
    fn report_seen(&self, device: &Device, gateway: &str) {
        let mut counts = self.lock();
        *counts.by_model.entry(device.model().to_string()).or_default() += 1;
        *counts.by_device.entry(device.did().clone()).or_default() += 1;
        *counts.by_gateway.entry(gateway.to_string()).or_default() += 1;
    }
}
