//! Error types for control operations
//!
//! Only client errors are `Err` values. Transient tool failures are
//! reported as unsuccessful results instead.

use hearth_core::{DeviceId, DeviceType};
use hearth_shell::{Platform, ShellError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    /// The id is not in the registry
    #[error("Device not found")]
    DeviceNotFound { device_id: DeviceId },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Action '{action}' requires parameter '{param}'")]
    MissingParameter { action: String, param: &'static str },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(Platform),

    #[error("Unsupported device type: {0}")]
    UnsupportedDeviceType(DeviceType),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Connecting or pairing did not succeed
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error(transparent)]
    Shell(#[from] ShellError),
}

impl ControlError {
    pub fn device_not_found(device_id: &DeviceId) -> Self {
        Self::DeviceNotFound {
            device_id: device_id.clone(),
        }
    }

    /// Errors caused by the request rather than the environment
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Shell(_) | Self::ConnectFailed { .. })
    }
}
