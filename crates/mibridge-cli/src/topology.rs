//! Builds the running bridge from a [`Config`].
//!
//! Every configured gateway gets its own [`LoopbackBus`], a [`BusGateway`]
//! on it and a [`MiotLink`]; all links share one [`DeviceRegistry`] and one
//! [`ReportCounter`].

use std::collections::HashMap;
use std::sync::Arc;

use mibridge_devices::{Device, DeviceRegistry, ReportHandler};
use mibridge_middleware::{BusGateway, LoopbackBus, MiotLink, ReportCounter};
use mibridge_types::Did;

use crate::config::Config;

pub struct Bridge {
    pub registry: Arc<DeviceRegistry>,
    pub buses: HashMap<String, LoopbackBus>,
    pub links: HashMap<String, MiotLink>,
    pub stats: Arc<ReportCounter>,
}

impl Bridge {
    pub fn link(&self, gateway: &str) -> Result<&MiotLink, String> {
        self.links
            .get(gateway)
            .ok_or_else(|| format!("unknown gateway '{gateway}'"))
    }
}

/// Wire up gateways, devices and links. Every device reports to `handler`.
pub fn build(cfg: &Config, handler: Arc<dyn ReportHandler>) -> Result<Bridge, String> {
    let registry = Arc::new(DeviceRegistry::new());
    let stats = Arc::new(ReportCounter::new());
    let mut buses = HashMap::new();
    let mut links = HashMap::new();

    for gw in &cfg.gateways {
        if links.contains_key(&gw.id) {
            return Err(format!("gateway '{}' is configured twice", gw.id));
        }
        let bus = LoopbackBus::new(cfg.bus_capacity.max(1));
        let gateway = Arc::new(BusGateway::new(gw.id.clone(), bus.clone()));
        gateway.set_available(gw.available);
        registry.register_gateway(gateway.clone());

        let link = MiotLink::new(gateway, registry.clone(), cfg.link_config()).with_stats(stats.clone());
        buses.insert(gw.id.clone(), bus);
        links.insert(gw.id.clone(), link);
    }

    for dev in &cfg.devices {
        let did = Did::new(dev.did.clone());
        for gw in &dev.gateways {
            if !links.contains_key(gw) {
                return Err(format!("device '{}' references unknown gateway '{}'", dev.did, gw));
            }
            registry.link(&did, gw);
        }
        registry.register_device(Arc::new(Device::new(did, dev.model.clone(), handler.clone())));
    }

    Ok(Bridge {
        registry,
        buses,
        links,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, GatewayConfig};
    use mibridge_devices::DeviceDirectory;
    use mibridge_types::Report;

    fn noop() -> Arc<dyn ReportHandler> {
        Arc::new(|_: &Device, _: Report, _: &str| {})
    }

    fn cfg() -> Config {
        Config {
            gateways: vec![
                GatewayConfig { id: "gw-a".to_string(), available: true },
                GatewayConfig { id: "gw-b".to_string(), available: false },
            ],
            devices: vec![DeviceConfig {
                did: "1".to_string(),
                model: "lumi.plug".to_string(),
                gateways: vec!["gw-a".to_string(), "gw-b".to_string()],
            }],
            ..Config::default()
        }
    }

    #[test]
    fn builds_links_and_topology() {
        let bridge = build(&cfg(), noop()).expect("build");
        assert_eq!(bridge.links.len(), 2);
        assert_eq!(bridge.buses.len(), 2);
        assert_eq!(bridge.link("gw-b").unwrap().gateway_id(), "gw-b");

        let did = Did::from("1");
        assert_eq!(bridge.registry.device(&did).unwrap().model(), "lumi.plug");
        let gateways = bridge.registry.gateways_for(&did);
        assert_eq!(gateways.len(), 2);
        assert!(!gateways[1].is_available());
    }

    #[test]
    fn unknown_gateway_reference_is_rejected() {
        let mut cfg = cfg();
        cfg.devices[0].gateways.push("gw-z".to_string());
        let err = build(&cfg, noop()).err().expect("must fail");
        assert!(err.contains("gw-z"));
    }

    #[test]
    fn duplicate_gateway_is_rejected() {
        let mut cfg = cfg();
        cfg.gateways.push(GatewayConfig { id: "gw-a".to_string(), available: true });
        assert!(build(&cfg, noop()).is_err());
    }

    #[test]
    fn unknown_link_lookup_is_an_error() {
        let bridge = build(&cfg(), noop()).expect("build");
        assert!(bridge.link("gw-z").is_err());
    }
}
