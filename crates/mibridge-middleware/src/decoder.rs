//! Report decoder.
//!
//! Classifies a [`BusMessage`] by topic and payload shape:
//!
//! | Topic | Payload | Outcome |
//! |---|---|---|
//! | `miio/report`, `central/report` | contains `"properties_changed"` | [`Decoded::PropertyBatch`] from the `params` list |
//! | `miio/report`, `central/report` | contains `"event_occured"` | [`Decoded::Event`] from the `params` object |
//! | `miio/command_ack` | `result` is a list holding at least one `{did, siid, value}` map | [`Decoded::PropertyBatch`] from `result` |
//! | anything else | | [`Decoded::Ignored`] |
//!
//! The marker check runs on the raw bytes, so payloads that carry neither
//! marker are never parsed. Unexpected shapes on a recognised topic are
//! never an error; they decode to [`Decoded::Ignored`].

use mibridge_types::{
    BusMessage, EventReport, PropertyReport, TOPIC_CENTRAL_REPORT, TOPIC_COMMAND_ACK,
    TOPIC_MIIO_REPORT,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const PROPERTIES_MARKER: &[u8] = br#""properties_changed""#;
// Vendor spelling.
const EVENT_MARKER: &[u8] = br#""event_occured""#;

const PROPERTY_DUMP_KEYS: [&str; 3] = ["did", "siid", "value"];

/// Result of classifying one bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Property changes, possibly spanning many devices, in arrival order.
    PropertyBatch(Vec<PropertyReport>),
    /// A single event notification.
    Event(EventReport),
    /// Nothing to dispatch.
    Ignored(IgnoreReason),
}

/// Why a message produced no report items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The topic is not a report or ack channel.
    UnhandledTopic,
    /// A report-channel payload carrying neither marker.
    NoMarker,
    /// A marker was present but `params` had the wrong shape.
    Malformed,
    /// An ack whose `result` is not a property dump.
    NotAPropertyDump,
}

/// Classify `message` and extract its report items.
pub fn decode(message: &BusMessage) -> Decoded {
    match message.topic.as_str() {
        TOPIC_MIIO_REPORT | TOPIC_CENTRAL_REPORT => decode_report(message),
        TOPIC_COMMAND_ACK => decode_ack(message),
        _ => Decoded::Ignored(IgnoreReason::UnhandledTopic),
    }
}

fn decode_report(message: &BusMessage) -> Decoded {
    if message.payload_contains(PROPERTIES_MARKER) {
        let Some(params) = params(message).and_then(Value::as_array) else {
            return Decoded::Ignored(IgnoreReason::Malformed);
        };
        let items = property_list(params);
        if items.is_empty() && !params.is_empty() {
            return Decoded::Ignored(IgnoreReason::Malformed);
        }
        Decoded::PropertyBatch(items)
    } else if message.payload_contains(EVENT_MARKER) {
        let Some(params) = params(message).filter(|p| p.is_object()) else {
            return Decoded::Ignored(IgnoreReason::Malformed);
        };
        match EventReport::deserialize(params) {
            Ok(event) => Decoded::Event(event),
            Err(e) => {
                debug!(topic = %message.topic, error = %e, "event params malformed");
                Decoded::Ignored(IgnoreReason::Malformed)
            }
        }
    } else {
        Decoded::Ignored(IgnoreReason::NoMarker)
    }
}

/// The ack channel doubles as a `get_properties` response. Only a `result`
/// list holding at least one map with `did`, `siid` and `value` is taken as
/// a property dump; error objects and plain acks are ignored.
fn decode_ack(message: &BusMessage) -> Decoded {
    let Some(result) = message
        .json()
        .and_then(|json| json.get("result"))
        .and_then(Value::as_array)
    else {
        return Decoded::Ignored(IgnoreReason::NotAPropertyDump);
    };
    if !result.iter().any(looks_like_property) {
        return Decoded::Ignored(IgnoreReason::NotAPropertyDump);
    }
    Decoded::PropertyBatch(property_list(result))
}

fn params(message: &BusMessage) -> Option<&Value> {
    message.json().and_then(|json| json.get("params"))
}

fn looks_like_property(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| PROPERTY_DUMP_KEYS.iter().all(|key| map.contains_key(*key)))
}

/// Decode every well-formed entry; malformed entries are skipped. Only
/// objects count: serde would otherwise accept a positional array.
fn property_list(values: &[Value]) -> Vec<PropertyReport> {
    values
        .iter()
        .filter(|value| value.is_object())
        .filter_map(|value| match PropertyReport::deserialize(value) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!(error = %e, "skipping malformed property entry");
                None
            }
        })
        .collect()
}
