//! `mibridge-middleware` – The MIoT Protocol Core
//!
//! Translates between the shared message bus and the device model, and
//! makes outbound commands survive a silent gateway.
//!
//! # Modules
//!
//! - [`decoder`] – classifies a raw [`BusMessage`][mibridge_types::BusMessage]
//!   and decodes its property batch or event.
//! - [`dispatcher`] – [`ReportDispatcher`]: resolves report items to devices,
//!   drops duplicates by `tid` and delivers one call per device.
//! - [`sender`] – [`CommandSender`]: builds command payloads and replays an
//!   unconfirmed command over a second gateway.
//! - [`stats`] – [`ReportCounter`]: per-model report presence counters.
//! - [`link`] – [`MiotLink`]: one gateway's inbound and outbound path in a
//!   single handle.
//! - [`bus`] / [`bus_gateway`] – an in-process loopback bus and a
//!   [`Gateway`][mibridge_devices::Gateway] publishing onto it.

pub mod bus;
pub mod bus_gateway;
pub mod decoder;
pub mod dispatcher;
pub mod link;
pub mod sender;
pub mod stats;

pub use bus::{LoopbackBus, TopicSubscriber};
pub use bus_gateway::BusGateway;
pub use decoder::{Decoded, IgnoreReason, decode};
pub use dispatcher::{DispatchSummary, ReportDispatcher};
pub use link::{Handled, LinkConfig, MiotLink};
pub use sender::{CommandSender, Delivery};
pub use stats::{ReportCounter, ReportStats};
