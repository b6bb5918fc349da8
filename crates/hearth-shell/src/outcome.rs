//! Classification of tool output into success or failure
//!
//! Several tools exit 0 while printing a failure message, or exit non-zero
//! for a device that is already in the requested state. Each tool gets a
//! classifier so the matching rules live in one place and can be swapped.

use crate::runner::CommandOutput;

/// What a tool invocation achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The requested change happened
    Success,
    /// The target was already in the requested state
    AlreadyDone,
    /// The tool reported failure; carries the tool's own text
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyDone)
    }
}

pub trait OutcomeClassifier: Send + Sync {
    fn classify(&self, output: &CommandOutput) -> Outcome;
}

/// Case-insensitive substring rules over stdout and stderr.
///
/// Rules are checked in order: already-done markers, failure markers, then
/// success markers. When no marker matches, the exit status decides if
/// `fallback_to_exit_status` is set, otherwise the run counts as failed.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    pub success: Vec<&'static str>,
    pub already_done: Vec<&'static str>,
    pub failure: Vec<&'static str>,
    pub fallback_to_exit_status: bool,
}

impl PatternClassifier {
    /// `adb connect HOST:PORT`
    pub fn adb_connect() -> Self {
        Self {
            success: vec!["connected to"],
            already_done: vec!["already connected"],
            failure: vec!["failed", "unable", "cannot", "refused", "no route"],
            fallback_to_exit_status: false,
        }
    }

    /// `adb pair HOST:PORT CODE`
    pub fn adb_pair() -> Self {
        Self {
            success: vec!["successfully paired"],
            already_done: vec![],
            failure: vec!["failed", "error"],
            fallback_to_exit_status: false,
        }
    }

    /// `bluetoothctl connect MAC`
    pub fn bluetoothctl_connect() -> Self {
        Self {
            success: vec!["connection successful"],
            already_done: vec!["alreadyconnected", "already connected"],
            failure: vec!["failed to connect", "not available", "error"],
            fallback_to_exit_status: false,
        }
    }

    /// `bluetoothctl disconnect MAC`
    pub fn bluetoothctl_disconnect() -> Self {
        Self {
            success: vec!["successful disconnected", "disconnection successful"],
            already_done: vec!["notconnected", "not connected"],
            failure: vec!["failed to disconnect", "not available", "error"],
            fallback_to_exit_status: true,
        }
    }

    /// `adb -s SERIAL shell ...`; the exit status reflects the bridge, not
    /// the remote command
    pub fn adb_shell() -> Self {
        Self {
            success: vec![],
            already_done: vec![],
            failure: vec![
                "error: device",
                "device offline",
                "no devices/emulators found",
                "unauthorized",
            ],
            fallback_to_exit_status: true,
        }
    }

    /// Tools that only communicate through their exit status
    pub fn exit_status() -> Self {
        Self {
            success: vec![],
            already_done: vec![],
            failure: vec![],
            fallback_to_exit_status: true,
        }
    }
}

impl OutcomeClassifier for PatternClassifier {
    fn classify(&self, output: &CommandOutput) -> Outcome {
        let text = output.combined();
        let lower = text.to_lowercase();

        if self.already_done.iter().any(|m| lower.contains(m)) {
            return Outcome::AlreadyDone;
        }
        if self.failure.iter().any(|m| lower.contains(m)) {
            return Outcome::Failed(text.trim().to_string());
        }
        if self.success.iter().any(|m| lower.contains(m)) {
            return Outcome::Success;
        }
        if self.fallback_to_exit_status && output.success() {
            return Outcome::Success;
        }
        Outcome::Failed(text.trim().to_string())
    }
}
