//! Bus capture files.
//!
//! One JSON object per line:
//!
//! ```text
//! {"gateway": "gw-a", "topic": "miio/report", "payload": {"method": "properties_changed", "params": [...]}}
//! ```
//!
//! A string `payload` is taken as the raw bus bytes, anything else is
//! re-serialised. An optional RFC 3339 `received_at` keeps the capture time;
//! without it the message is stamped at replay. Blank lines and lines
//! starting with `#` are skipped.

use chrono::{DateTime, Utc};
use mibridge_types::BusMessage;
use serde::Deserialize;
use serde_json::Value;

/// One captured bus delivery.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptureRecord {
    pub gateway: String,
    pub topic: String,
    pub payload: Value,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl CaptureRecord {
    pub fn to_message(&self) -> BusMessage {
        let payload = match &self.payload {
            Value::String(raw) => raw.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        };
        let message = BusMessage::new(self.topic.clone(), payload);
        match self.received_at {
            Some(at) => message.with_received_at(at),
            None => message,
        }
    }
}

/// Parse a whole capture file.
pub fn parse_capture(text: &str) -> Result<Vec<CaptureRecord>, String> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| format!("capture line {}: {}", n + 1, e))
        })
        .collect()
}
