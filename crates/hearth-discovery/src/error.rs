//! Error types for discovery internals
//!
//! Scanner entry points never return these; they log them and report an
//! empty or partial device list instead.

use hearth_shell::ShellError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No non-loopback IPv4 interface to derive a subnet from
    #[error("No usable IPv4 network interface")]
    NoInterface,

    /// The service-discovery daemon could not be created
    #[error("Failed to initialize mDNS daemon: {0}")]
    MdnsInit(String),

    /// Browsing for a service type failed
    #[error("Failed to browse for service type '{service_type}': {reason}")]
    Browse { service_type: String, reason: String },

    /// An external tool failed
    #[error(transparent)]
    Shell(#[from] ShellError),

    /// Tool ran but exited non-zero
    #[error("{program} exited with status {status:?}: {stderr}")]
    ToolFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}
