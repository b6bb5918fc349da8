//! Results of control actions

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;

/// Result of one control action against one device.
///
/// Transient tool failures are reported here with `success = false`; only
/// client errors (unknown device, unknown action) are `Err` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlOutcome {
    pub success: bool,
    pub action: String,
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Intent was recorded but nothing was sent to the device
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub acknowledged_only: bool,
}

impl ControlOutcome {
    pub fn succeeded(action: &str, device_id: &DeviceId, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            device_id: device_id.clone(),
            message: Some(message.into()),
            error: None,
            acknowledged_only: false,
        }
    }

    pub fn failed(action: &str, device_id: &DeviceId, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: action.to_string(),
            device_id: device_id.clone(),
            message: None,
            error: Some(error.into()),
            acknowledged_only: false,
        }
    }

    /// Success without any command reaching the device
    pub fn acknowledged(action: &str, device_id: &DeviceId) -> Self {
        Self {
            acknowledged_only: true,
            ..Self::succeeded(action, device_id, format!("{} acknowledged", action))
        }
    }
}
