//! Hearth Control - Device controllers and orchestration
//!
//! This crate provides:
//! - Bluetooth peripheral scanning and connection through platform tools
//! - Android TV control over the Android debug bridge
//! - The device orchestrator, which owns the connected-device registry

pub mod bluetooth;
pub mod error;
pub mod orchestrator;
pub mod remote_shell;

pub use bluetooth::{BluetoothConfig, BluetoothPeripheralController, BluetoothScan};
pub use error::{ControlError, Result};
pub use orchestrator::{DeviceOrchestrator, PairOutcome};
pub use remote_shell::{RemoteShellConfig, RemoteShellDeviceController, RemoteShellSession, TvInfo};
