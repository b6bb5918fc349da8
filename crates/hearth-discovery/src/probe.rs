//! TCP port probing for device liveness

use hearth_core::{DeviceDescriptor, DeviceType};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, trace};

/// Per-probe timeout used when no other value is configured
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Probes a TCP port and reports hosts that accept as devices of one type
#[derive(Debug, Clone)]
pub struct PortProbeScanner {
    device_type: DeviceType,
}

impl Default for PortProbeScanner {
    fn default() -> Self {
        Self::new(DeviceType::AndroidTv)
    }
}

impl PortProbeScanner {
    pub fn new(device_type: DeviceType) -> Self {
        Self { device_type }
    }

    /// Attempt one connection; `Some` only if `address:port` accepted within `limit`
    pub async fn probe(&self, address: Ipv4Addr, port: u16, limit: Duration) -> Option<DeviceDescriptor> {
        let target = SocketAddr::from((address, port));
        match timeout(limit, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                debug!(ip = %address, port = port, "Port open");
                Some(self.descriptor(address, port))
            }
            Ok(Err(e)) => {
                trace!(ip = %address, port = port, error = %e, "Probe refused");
                None
            }
            Err(_) => {
                trace!(ip = %address, port = port, "Probe timed out");
                None
            }
        }
    }

    /// Probe every host concurrently; results arrive in completion order
    pub async fn probe_hosts(&self, hosts: &[Ipv4Addr], port: u16, limit: Duration) -> Vec<DeviceDescriptor> {
        let mut tasks = JoinSet::new();

        for &host in hosts {
            let scanner = self.clone();
            tasks.spawn(async move { scanner.probe(host, port, limit).await });
        }

        let mut found = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(device)) = result {
                info!(ip = %device.address, port = port, "Found device with open control port");
                found.push(device);
            }
        }

        debug!("Probed {} hosts, found {} devices", hosts.len(), found.len());
        found
    }

    /// Probe all 254 hosts of the /24 containing `subnet`
    pub async fn sweep_subnet(&self, subnet: Ipv4Addr, port: u16, limit: Duration) -> Vec<DeviceDescriptor> {
        let hosts = subnet_hosts(subnet);
        debug!(subnet = %subnet, hosts = hosts.len(), port = port, "Sweeping subnet");
        self.probe_hosts(&hosts, port, limit).await
    }

    fn descriptor(&self, address: Ipv4Addr, port: u16) -> DeviceDescriptor {
        let name = match self.device_type {
            DeviceType::AndroidTv => format!("Android TV ({})", address),
            other => format!("{} ({})", other, address),
        };
        DeviceDescriptor::new(name, self.device_type, address.to_string()).with_port(port)
    }
}

/// Host addresses `.1` through `.254` of the /24 containing `subnet`
pub fn subnet_hosts(subnet: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = subnet.octets();
    (1..=254).map(|d| Ipv4Addr::new(a, b, c, d)).collect()
}
