//! `mibridge-types` – shared vocabulary of the MIoT bridge.
//!
//! Every other crate in the workspace speaks in these types: the decoded
//! report items, the outbound command payload, the raw bus message and the
//! global [`BridgeError`].

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Bus topics
// ────────────────────────────────────────────────────────────────────────────

/// Inbound report channel of the local miio agent.
pub const TOPIC_MIIO_REPORT: &str = "miio/report";
/// Inbound report channel of the central (BLE mesh / zigbee) hub.
pub const TOPIC_CENTRAL_REPORT: &str = "central/report";
/// Inbound acknowledgement channel; may carry a property dump in `result`.
pub const TOPIC_COMMAND_ACK: &str = "miio/command_ack";
/// Outbound command channel, used for both primary and failover publishes.
pub const TOPIC_COMMAND: &str = "miio/command";

// ────────────────────────────────────────────────────────────────────────────
// Device identifier
// ────────────────────────────────────────────────────────────────────────────

/// Vendor device identifier, stable across gateways.
///
/// Vendor payloads carry the `did` either as a JSON string or as a bare
/// integer, so both decode to the same value. It always serialises as a
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Did {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Did {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for Did {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawDid {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match RawDid::deserialize(deserializer)? {
            RawDid::Text(s) => Did(s),
            RawDid::Signed(n) => Did(n.to_string()),
            RawDid::Unsigned(n) => Did(n.to_string()),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sequence id
// ────────────────────────────────────────────────────────────────────────────

/// Report sequence id.
///
/// Gateways send integers, strings and occasionally floats, so the value is
/// kept as received and only ever compared for equality. `158` and `"158"`
/// are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tid(Value);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for Tid {
    fn from(value: i64) -> Self {
        Self(value.into())
    }
}

impl From<&str> for Tid {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Report items
// ────────────────────────────────────────────────────────────────────────────

/// A value change for one (service, property) pair on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyReport {
    pub did: Did,
    pub siid: u32,
    /// Absent in some property dumps on the ack channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piid: Option<u32>,
    pub value: Value,
    /// Sequence id; `None` means the report is never deduplicated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<Tid>,
    /// Per-property status code attached to read responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

/// An occurrence notification raised by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventReport {
    pub did: Did,
    pub siid: u32,
    pub eiid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<Tid>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub arguments: Vec<Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// What a device's report entry point receives: every property change for
/// that device from one delivery, or a single event.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Properties(Vec<PropertyReport>),
    Event(EventReport),
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound commands
// ────────────────────────────────────────────────────────────────────────────

/// The two command methods the command channel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandMethod {
    GetProperties,
    SetProperties,
}

impl CommandMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandMethod::GetProperties => "get_properties",
            CommandMethod::SetProperties => "set_properties",
        }
    }
}

impl fmt::Display for CommandMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandMethod {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_properties" => Ok(CommandMethod::GetProperties),
            "set_properties" => Ok(CommandMethod::SetProperties),
            other => Err(BridgeError::InvalidMethod(other.to_string())),
        }
    }
}

/// One property addressed by a command, before it is bound to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub siid: u32,
    pub piid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Caller-supplied command data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandData {
    #[serde(default)]
    pub mi_spec: Vec<PropertyDescriptor>,
}

/// A [`PropertyDescriptor`] stamped with the target device id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyParam {
    pub did: Did,
    pub siid: u32,
    pub piid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Wire payload published on [`TOPIC_COMMAND`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub method: CommandMethod,
    pub params: Vec<PropertyParam>,
}

impl CommandPayload {
    /// Build the payload for `did`, stamping every `mi_spec` entry with it.
    pub fn build(did: &Did, method: CommandMethod, data: &CommandData) -> Self {
        let params = data
            .mi_spec
            .iter()
            .map(|p| PropertyParam {
                did: did.clone(),
                siid: p.siid,
                piid: p.piid,
                value: p.value.clone(),
            })
            .collect();
        Self { method, params }
    }

    /// Serialise to the JSON bytes published on the bus.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self).map_err(|e| BridgeError::Serialization(e.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Raw bus message
// ────────────────────────────────────────────────────────────────────────────

/// A topic/payload pair as delivered by the bus transport.
///
/// The JSON view of the payload is parsed at most once, on first request.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
    json: OnceLock<Option<Value>>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
            json: OnceLock::new(),
        }
    }

    /// Replace the receive stamp, e.g. with the time recorded in a capture.
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Parsed JSON payload, or `None` when the payload is not valid JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json
            .get_or_init(|| serde_json::from_slice(&self.payload).ok())
            .as_ref()
    }

    /// Whether the raw payload contains `needle`, without parsing it.
    pub fn payload_contains(&self, needle: &[u8]) -> bool {
        !needle.is_empty() && self.payload.windows(needle.len()).any(|w| w == needle)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type of the bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Transport error on gateway {gateway}: {details}")]
    Transport { gateway: String, details: String },

    #[error("Invalid command method: {0}")]
    InvalidMethod(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
