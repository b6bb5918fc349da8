//! Local subnet resolution from the host's network interfaces

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, warn};

use crate::error::{DiscoveryError, Result};

/// Netmask assumed when an interface does not report one
const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// The local address, its netmask, and the network they describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubnetInfo {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// `address & netmask`
    pub subnet: Ipv4Addr,
}

impl SubnetInfo {
    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        let subnet = Ipv4Addr::from(u32::from(address) & u32::from(netmask));
        Self {
            address,
            netmask,
            subnet,
        }
    }

    /// Subnet given directly (e.g. from configuration), assuming a /24
    pub fn from_subnet(subnet: Ipv4Addr) -> Self {
        Self::new(subnet, DEFAULT_NETMASK)
    }

    pub fn prefix_len(&self) -> u8 {
        u32::from(self.netmask).count_ones() as u8
    }

    /// Network of the scanned range: the host's own /24 when the real
    /// network is wider, otherwise the network itself
    pub fn scan_base(&self) -> Ipv4Addr {
        if self.prefix_len() < 24 {
            Ipv4Addr::from(u32::from(self.address) & u32::from(DEFAULT_NETMASK))
        } else {
            self.subnet
        }
    }

    /// CIDR notation for the scanned range, e.g. `192.168.1.0/24`
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.scan_base(), self.prefix_len().max(24))
    }

    /// Whether `ip` falls in the /24 that sweeps of this subnet cover
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        is_in_subnet(ip, self.scan_base(), 24)
    }
}

/// One address of one interface, as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub address: IpAddr,
    pub netmask: Option<IpAddr>,
}

#[derive(Debug, Clone)]
enum Source {
    System,
    Fixed(Vec<InterfaceAddr>),
    Override(SubnetInfo),
}

/// Derives the subnet to scan
#[derive(Debug, Clone)]
pub struct SubnetResolver {
    source: Source,
}

impl Default for SubnetResolver {
    fn default() -> Self {
        Self::system()
    }
}

impl SubnetResolver {
    /// Resolve from the live network interfaces
    pub fn system() -> Self {
        Self {
            source: Source::System,
        }
    }

    /// Resolve from a fixed interface list
    pub fn from_interfaces(interfaces: Vec<InterfaceAddr>) -> Self {
        Self {
            source: Source::Fixed(interfaces),
        }
    }

    /// Always resolve to `subnet`, skipping interface inspection
    pub fn with_override(subnet: SubnetInfo) -> Self {
        Self {
            source: Source::Override(subnet),
        }
    }

    /// First non-loopback IPv4 interface's subnet, or `None` if there is none
    pub fn resolve(&self) -> Option<SubnetInfo> {
        match &self.source {
            Source::Override(info) => Some(*info),
            Source::Fixed(interfaces) => select_subnet(interfaces),
            Source::System => select_subnet(&system_interfaces()),
        }
    }

    /// Like [`resolve`](Self::resolve), with the missing interface as an error
    pub fn try_resolve(&self) -> Result<SubnetInfo> {
        self.resolve().ok_or(DiscoveryError::NoInterface)
    }
}

/// Pick the first non-loopback IPv4 address and compute its subnet
pub fn select_subnet(interfaces: &[InterfaceAddr]) -> Option<SubnetInfo> {
    interfaces.iter().find_map(|iface| match iface.address {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => {
            let netmask = match iface.netmask {
                Some(IpAddr::V4(mask)) => mask,
                _ => DEFAULT_NETMASK,
            };
            let info = SubnetInfo::new(ip, netmask);
            debug!(interface = %iface.name, address = %ip, subnet = %info.subnet, "Resolved local subnet");
            Some(info)
        }
        _ => None,
    })
}

fn system_interfaces() -> Vec<InterfaceAddr> {
    let interfaces = match NetworkInterface::show() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate network interfaces");
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .flat_map(|iface| {
            let name = iface.name.clone();
            iface.addr.into_iter().map(move |addr| match addr {
                Addr::V4(v4) => InterfaceAddr {
                    name: name.clone(),
                    address: IpAddr::V4(v4.ip),
                    netmask: v4.netmask.map(IpAddr::V4),
                },
                Addr::V6(v6) => InterfaceAddr {
                    name: name.clone(),
                    address: IpAddr::V6(v6.ip),
                    netmask: v6.netmask.map(IpAddr::V6),
                },
            })
        })
        .collect()
}

/// Check if IP is in subnet
pub fn is_in_subnet(ip: Ipv4Addr, subnet: Ipv4Addr, prefix_len: u8) -> bool {
    let ip_u32 = u32::from(ip);
    let subnet_u32 = u32::from(subnet);
    let mask = if prefix_len >= 32 {
        0xFFFFFFFF
    } else if prefix_len == 0 {
        0
    } else {
        !((1u32 << (32 - prefix_len)) - 1)
    };
    (ip_u32 & mask) == (subnet_u32 & mask)
}
