//! `mibridge-devices` – Device Model
//!
//! The state this bridge reads and mutates on behalf of an external device
//! registry.
//!
//! # Modules
//!
//! - [`sequence`] – [`SequenceTracker`][sequence::SequenceTracker]: the
//!   last-seen `tid` of a device and its atomic duplicate check.
//! - [`listeners`] – [`ListenerRegistry`][listeners::ListenerRegistry]:
//!   per-device one-shot confirmation handles fired on every report.
//! - [`device`] – [`Device`][device::Device] and the external
//!   [`ReportHandler`][device::ReportHandler] entry point.
//! - [`gateway`] – the [`Gateway`][gateway::Gateway] trait every bus
//!   endpoint implements.
//! - [`registry`] – [`DeviceRegistry`][registry::DeviceRegistry], the
//!   read-only device/gateway topology view handed to the protocol core.

pub mod device;
pub mod gateway;
pub mod listeners;
pub mod registry;
pub mod sequence;

pub use device::{Device, ReportHandler};
pub use gateway::Gateway;
pub use listeners::{ListenerGuard, ListenerRegistry};
pub use registry::{DeviceDirectory, DeviceRegistry};
pub use sequence::SequenceTracker;
