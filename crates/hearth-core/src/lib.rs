//! Hearth Core - Shared device types
//!
//! This crate provides the types every other Hearth crate speaks:
//! - Device descriptors produced by discovery
//! - Device types and capability sets
//! - Registry entries for connected devices
//! - Control action outcomes

pub mod control;
pub mod device;

pub use control::ControlOutcome;
pub use device::{
    Capability, ConnectedDevice, ConnectionStatus, DeviceDescriptor, DeviceId, DeviceType,
    ParseDeviceTypeError,
};
