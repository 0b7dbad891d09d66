//! [`DeviceRegistry`] – device/gateway topology handed to the protocol core.
//!
//! The core never walks global state: it is given a [`DeviceDirectory`] and
//! asks it two questions, "which device owns this `did`?" and "which
//! gateways reach this device?". [`DeviceRegistry`] is the in-memory
//! implementation used by the CLI and the tests.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mibridge_types::Did;
use tracing::debug;

use crate::device::Device;
use crate::gateway::Gateway;

/// Read-only view of the device/gateway graph.
pub trait DeviceDirectory: Send + Sync {
    /// Resolve `did` to a known device.
    fn device(&self, did: &Did) -> Option<Arc<Device>>;

    /// Every registered gateway that reaches `did`, in link order.
    fn gateways_for(&self, did: &Did) -> Vec<Arc<dyn Gateway>>;
}

/// In-memory device and gateway registry.
///
/// All methods take `&self`, so one registry can be shared through an
/// [`Arc`] by every gateway link.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<Did, Arc<Device>>>,
    gateways: RwLock<HashMap<String, Arc<dyn Gateway>>>,
    links: RwLock<HashMap<Did, Vec<String>>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device. Any previously registered device with the same
    /// `did` is replaced and returned.
    pub fn register_device(&self, device: Arc<Device>) -> Option<Arc<Device>> {
        write(&self.devices).insert(device.did().clone(), device)
    }

    /// Remove a device together with its gateway links.
    pub fn remove_device(&self, did: &Did) -> Option<Arc<Device>> {
        write(&self.links).remove(did);
        write(&self.devices).remove(did)
    }

    /// Register a gateway. Any previously registered gateway with the same
    /// id is replaced.
    pub fn register_gateway(&self, gateway: Arc<dyn Gateway>) {
        write(&self.gateways).insert(gateway.id().to_string(), gateway);
    }

    /// Record that `gateway_id` reaches `did`. Linking twice is a no-op.
    pub fn link(&self, did: &Did, gateway_id: &str) {
        let mut links = write(&self.links);
        let ids = links.entry(did.clone()).or_default();
        if !ids.iter().any(|id| id == gateway_id) {
            ids.push(gateway_id.to_string());
            debug!(did = %did, gateway = gateway_id, "device linked to gateway");
        }
    }

    /// Forget that `gateway_id` reaches `did`.
    pub fn unlink(&self, did: &Did, gateway_id: &str) {
        if let Some(ids) = write(&self.links).get_mut(did) {
            ids.retain(|id| id != gateway_id);
        }
    }

    pub fn device_count(&self) -> usize {
        read(&self.devices).len()
    }
}

impl DeviceDirectory for DeviceRegistry {
    fn device(&self, did: &Did) -> Option<Arc<Device>> {
        read(&self.devices).get(did).cloned()
    }

    fn gateways_for(&self, did: &Did) -> Vec<Arc<dyn Gateway>> {
        let links = read(&self.links);
        let Some(ids) = links.get(did) else {
            return Vec::new();
        };
        let gateways = read(&self.gateways);
        ids.iter().filter_map(|id| gateways.get(id).cloned()).collect()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
