//! End-to-end: one device reachable through two gateways, each on its own
//! loopback bus.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mibridge_devices::{Device, DeviceRegistry};
use mibridge_middleware::{
    BusGateway, Delivery, DispatchSummary, Handled, LinkConfig, LoopbackBus, MiotLink,
};
use mibridge_types::{
    BusMessage, CommandData, CommandMethod, PropertyDescriptor, Report, TOPIC_COMMAND,
    TOPIC_COMMAND_ACK, TOPIC_MIIO_REPORT,
};
use serde_json::{Value, json};

struct Topology {
    device: Arc<Device>,
    bus_a: LoopbackBus,
    bus_b: LoopbackBus,
    gw_b: Arc<BusGateway>,
    link_a: Arc<MiotLink>,
    link_b: Arc<MiotLink>,
    reports: Arc<Mutex<Vec<(Report, String)>>>,
}

fn topology(failover_delay: Duration) -> Topology {
    let reports: Arc<Mutex<Vec<(Report, String)>>> = Arc::default();
    let sink = reports.clone();
    let device = Arc::new(Device::new(
        "lumi.158d0001",
        "lumi.plug.mmeu01",
        Arc::new(move |_: &Device, r: Report, gw: &str| sink.lock().unwrap().push((r, gw.to_string()))),
    ));

    let bus_a = LoopbackBus::default();
    let bus_b = LoopbackBus::default();
    let gw_a = Arc::new(BusGateway::new("gw-a", bus_a.clone()));
    let gw_b = Arc::new(BusGateway::new("gw-b", bus_b.clone()));

    let registry = Arc::new(DeviceRegistry::new());
    registry.register_device(device.clone());
    registry.register_gateway(gw_a.clone());
    registry.register_gateway(gw_b.clone());
    registry.link(device.did(), "gw-a");
    registry.link(device.did(), "gw-b");

    let config = LinkConfig { failover_delay };
    let link_a = Arc::new(MiotLink::new(gw_a, registry.clone(), config.clone()));
    let link_b = Arc::new(MiotLink::new(gw_b.clone(), registry, config));

    Topology {
        device,
        bus_a,
        bus_b,
        gw_b,
        link_a,
        link_b,
        reports,
    }
}

fn report(tid: i64) -> BusMessage {
    let payload = json!({
        "method": "properties_changed",
        "params": [{"did": "lumi.158d0001", "siid": 2, "piid": 1, "value": true, "tid": tid}]
    });
    BusMessage::new(TOPIC_MIIO_REPORT, serde_json::to_vec(&payload).unwrap())
}

fn switch_on() -> CommandData {
    CommandData {
        mi_spec: vec![PropertyDescriptor {
            siid: 2,
            piid: 1,
            value: Some(json!(true)),
        }],
    }
}

fn body(message: &BusMessage) -> Value {
    serde_json::from_slice(&message.payload).unwrap()
}

#[test]
fn redundant_report_is_applied_once() {
    let t = topology(Duration::from_secs(1));

    let first = t.link_a.handle_message(&report(41));
    let second = t.link_b.handle_message(&report(41));

    assert_eq!(first, Handled::Dispatched(DispatchSummary { delivered: 1, duplicates: 0, unknown: 0 }));
    assert_eq!(second, Handled::Dispatched(DispatchSummary { delivered: 0, duplicates: 1, unknown: 0 }));

    let reports = t.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1, "gw-a");
}

#[test]
fn ack_property_dump_reaches_device() {
    let t = topology(Duration::from_secs(1));
    let payload = json!({"id": 3, "result": [{"did": "lumi.158d0001", "siid": 2, "piid": 1, "value": false, "code": 0}]});
    let handled = t
        .link_b
        .handle_message(&BusMessage::new(TOPIC_COMMAND_ACK, serde_json::to_vec(&payload).unwrap()));

    assert_eq!(handled, Handled::Dispatched(DispatchSummary { delivered: 1, duplicates: 0, unknown: 0 }));
    let reports = t.reports.lock().unwrap();
    let Report::Properties(items) = &reports[0].0 else {
        panic!("expected properties");
    };
    assert_eq!(items[0].code, Some(0));
    assert_eq!(reports[0].1, "gw-b");
}

#[tokio::test]
async fn silent_primary_fails_over_to_second_gateway() {
    let t = topology(Duration::from_millis(30));
    let mut commands_a = t.bus_a.subscribe_topic(TOPIC_COMMAND);
    let mut commands_b = t.bus_b.subscribe_topic(TOPIC_COMMAND);

    let delivery = t
        .link_a
        .send(&t.device, CommandMethod::SetProperties, &switch_on())
        .await
        .unwrap();

    assert_eq!(delivery, Delivery::FailedOver { gateway: "gw-b".to_string() });
    let primary = commands_a.try_recv().expect("primary publish");
    let secondary = commands_b.try_recv().expect("failover publish");
    assert_eq!(body(&primary), body(&secondary));
    assert_eq!(
        body(&primary),
        json!({
            "method": "set_properties",
            "params": [{"did": "lumi.158d0001", "siid": 2, "piid": 1, "value": true}]
        })
    );
    assert!(commands_a.try_recv().is_none());
    assert!(commands_b.try_recv().is_none());
    assert!(t.device.listeners().is_empty());
}

#[tokio::test]
async fn device_answer_confirms_primary() {
    let t = topology(Duration::from_millis(500));
    let mut commands_a = t.bus_a.subscribe_topic(TOPIC_COMMAND);
    let mut commands_b = t.bus_b.subscribe_topic(TOPIC_COMMAND);

    // Plays the device: answer the first command seen on gateway A's bus.
    let link = t.link_a.clone();
    let mut device_side = t.bus_a.subscribe_topic(TOPIC_COMMAND);
    let responder = tokio::spawn(async move {
        device_side.recv().await.expect("command on bus A");
        link.handle_message(&report(7))
    });

    let delivery = t
        .link_a
        .send(&t.device, CommandMethod::SetProperties, &switch_on())
        .await
        .unwrap();

    assert_eq!(delivery, Delivery::Confirmed);
    assert!(matches!(responder.await.unwrap(), Handled::Dispatched(_)));
    assert!(commands_a.try_recv().is_some());
    assert!(commands_b.try_recv().is_none());
    assert!(t.device.listeners().is_empty());
}

#[tokio::test]
async fn offline_second_gateway_disables_failover() {
    let t = topology(Duration::from_millis(30));
    t.gw_b.set_available(false);
    let mut commands_b = t.bus_b.subscribe_topic(TOPIC_COMMAND);

    let delivery = t
        .link_a
        .send(&t.device, CommandMethod::GetProperties, &switch_on())
        .await
        .unwrap();

    assert_eq!(delivery, Delivery::Direct);
    assert!(commands_b.try_recv().is_none());
}
