//! Hearth Discovery - Finding controllable devices on the local network
//!
//! This crate provides the discovery paths:
//! - Subnet resolution from the host's interfaces
//! - Concurrent TCP port probing and ARP-seeded probing
//! - Android TV scanning (nmap, then probe sweeps)
//! - Chromecast scanning over multicast DNS

pub mod arp;
pub mod browser;
pub mod error;
pub mod multicast;
pub mod network;
pub mod probe;
pub mod subnet;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use browser::{MdnsBrowser, ResolvedService, ServiceBrowser};
pub use error::{DiscoveryError, Result};
pub use multicast::{MulticastConfig, MulticastDeviceScanner, GOOGLECAST_SERVICE};
pub use network::{NetworkDeviceScanner, NetworkScannerConfig, SweepStrategy, ANDROID_TV_PORT};
pub use probe::{PortProbeScanner, DEFAULT_PROBE_TIMEOUT};
pub use subnet::{SubnetInfo, SubnetResolver};
