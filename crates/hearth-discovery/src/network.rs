//! Android TV discovery over the local subnet
//!
//! Strategies, first non-empty result wins:
//! 1. `nmap` scan of the subnet for the open control port
//! 2. concurrent TCP sweep of the /24, or on Windows (and when configured)
//!    probes seeded from the ARP table instead of a blind sweep

use hearth_core::{DeviceDescriptor, DeviceType};
use hearth_shell::{Platform, SharedRunner};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::arp::{candidates_in_subnet, read_arp_table};
use crate::probe::{PortProbeScanner, DEFAULT_PROBE_TIMEOUT};
use crate::subnet::{SubnetInfo, SubnetResolver};

/// Remote-shell control port Android TVs listen on
pub const ANDROID_TV_PORT: u16 = 5555;

/// How the fallback stage picks hosts to probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStrategy {
    /// ARP-seeded on Windows, full sweep elsewhere
    #[default]
    Auto,
    /// Probe every host in the /24
    Sweep,
    /// Probe only hosts present in the ARP table
    Arp,
}

/// Network scanner configuration
#[derive(Debug, Clone)]
pub struct NetworkScannerConfig {
    /// Control port to look for
    pub control_port: u16,
    /// Per-host probe timeout
    pub probe_timeout: Duration,
    /// Upper bound for a whole nmap run
    pub nmap_timeout: Duration,
    /// nmap executable
    pub nmap_program: String,
    pub strategy: SweepStrategy,
}

impl Default for NetworkScannerConfig {
    fn default() -> Self {
        Self {
            control_port: ANDROID_TV_PORT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            nmap_timeout: Duration::from_secs(30),
            nmap_program: "nmap".to_string(),
            strategy: SweepStrategy::Auto,
        }
    }
}

pub struct NetworkDeviceScanner {
    config: NetworkScannerConfig,
    runner: SharedRunner,
    resolver: SubnetResolver,
    prober: PortProbeScanner,
    platform: Platform,
}

impl NetworkDeviceScanner {
    pub fn new(config: NetworkScannerConfig, runner: SharedRunner) -> Self {
        Self {
            config,
            runner,
            resolver: SubnetResolver::system(),
            prober: PortProbeScanner::new(DeviceType::AndroidTv),
            platform: Platform::current(),
        }
    }

    pub fn with_resolver(mut self, resolver: SubnetResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Find Android TVs on the local subnet. Never fails: an empty list means
    /// nothing was found or no strategy could run.
    pub async fn scan_for_android_tvs(&self) -> Vec<DeviceDescriptor> {
        let subnet = match self.resolver.try_resolve() {
            Ok(subnet) => subnet,
            Err(e) => {
                warn!(error = %e, "Could not determine local subnet, skipping network scan");
                return Vec::new();
            }
        };

        info!(subnet = %subnet.cidr(), port = self.config.control_port, "Scanning for Android TVs");

        let found = self.scan_with_nmap(&subnet).await;
        if !found.is_empty() {
            info!("nmap found {} Android TVs", found.len());
            return found;
        }

        let found = if self.uses_arp_seed() {
            self.scan_arp_seeded(&subnet).await
        } else {
            self.prober
                .sweep_subnet(subnet.scan_base(), self.config.control_port, self.config.probe_timeout)
                .await
        };

        info!("Found {} Android TVs", found.len());
        found
    }

    fn uses_arp_seed(&self) -> bool {
        match self.config.strategy {
            SweepStrategy::Auto => self.platform == Platform::Windows,
            SweepStrategy::Sweep => false,
            SweepStrategy::Arp => true,
        }
    }

    async fn scan_with_nmap(&self, subnet: &SubnetInfo) -> Vec<DeviceDescriptor> {
        let program = self.config.nmap_program.as_str();
        if !self.runner.is_available(program) {
            debug!("nmap not installed, falling back to port probing");
            return Vec::new();
        }

        let port = self.config.control_port.to_string();
        let cidr = subnet.cidr();
        let args = ["-p", port.as_str(), "--open", "-oG", "-", cidr.as_str()];

        match self.runner.run(program, &args, self.config.nmap_timeout).await {
            Ok(output) if output.success() => parse_nmap_grepable(&output.stdout, self.config.control_port),
            Ok(output) => {
                warn!(status = ?output.status, stderr = %output.stderr.trim(), "nmap scan failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "nmap scan failed");
                Vec::new()
            }
        }
    }

    async fn scan_arp_seeded(&self, subnet: &SubnetInfo) -> Vec<DeviceDescriptor> {
        let entries = match read_arp_table(self.runner.as_ref(), self.platform).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read ARP table");
                return Vec::new();
            }
        };

        let candidates = candidates_in_subnet(&entries, subnet);
        debug!("Probing {} ARP candidates", candidates.len());
        self.prober
            .probe_hosts(&candidates, self.config.control_port, self.config.probe_timeout)
            .await
    }
}

/// Parse `nmap -oG -` output into descriptors for hosts with `port` open
pub fn parse_nmap_grepable(output: &str, port: u16) -> Vec<DeviceDescriptor> {
    let open_marker = format!("{}/open", port);
    let mut devices: Vec<DeviceDescriptor> = Vec::new();

    for line in output.lines() {
        // Host: 192.168.1.20 (shield.lan)	Ports: 5555/open/tcp//freeciv///
        let Some(rest) = line.strip_prefix("Host:") else {
            continue;
        };
        if !line.contains(&open_marker) {
            continue;
        }

        let mut parts = rest.split_whitespace();
        let Some(ip) = parts.next().and_then(|s| Ipv4Addr::from_str(s).ok()) else {
            continue;
        };
        let hostname = parts
            .next()
            .map(|s| s.trim_start_matches('(').trim_end_matches(')'))
            .filter(|s| !s.is_empty());

        let address = ip.to_string();
        if devices.iter().any(|d| d.address == address) {
            continue;
        }

        let name = match hostname {
            Some(host) => host.to_string(),
            None => format!("Android TV ({})", ip),
        };
        devices.push(DeviceDescriptor::new(name, DeviceType::AndroidTv, address).with_port(port));
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_shell::test_utils::{Scripted, ScriptedRunner};
    use hearth_shell::CommandOutput;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    const NMAP_OUTPUT: &str = "# Nmap 7.94 scan initiated\n\
        Host: 192.168.1.20 (shield.lan)\tStatus: Up\n\
        Host: 192.168.1.20 (shield.lan)\tPorts: 5555/open/tcp//freeciv///\n\
        Host: 192.168.1.31 ()\tPorts: 5555/open/tcp//freeciv///\n\
        Host: 192.168.1.40 ()\tPorts: 5555/filtered/tcp//freeciv///\n\
        # Nmap done at ...\n";

    fn local_subnet() -> SubnetResolver {
        SubnetResolver::with_override(SubnetInfo::from_subnet(Ipv4Addr::new(127, 0, 0, 0)))
    }

    #[test]
    fn test_parse_nmap_grepable() {
        let devices = parse_nmap_grepable(NMAP_OUTPUT, 5555);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].address, "192.168.1.20");
        assert_eq!(devices[0].name, "shield.lan");
        assert_eq!(devices[0].port, Some(5555));
        assert_eq!(devices[1].name, "Android TV (192.168.1.31)");
        assert!(devices.iter().all(|d| d.device_type == DeviceType::AndroidTv));
    }

    #[tokio::test]
    async fn test_nmap_result_short_circuits() {
        let runner = Arc::new(ScriptedRunner::new().on_stdout("nmap", NMAP_OUTPUT));
        let scanner = NetworkDeviceScanner::new(NetworkScannerConfig::default(), runner.clone())
            .with_resolver(SubnetResolver::with_override(SubnetInfo::from_subnet(Ipv4Addr::new(
                192, 168, 1, 0,
            ))));

        let devices = scanner.scan_for_android_tvs().await;
        assert_eq!(devices.len(), 2);
        assert_eq!(
            runner.calls(),
            vec!["nmap -p 5555 --open -oG - 192.168.1.0/24".to_string()]
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_sweep_without_nmap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runner = Arc::new(ScriptedRunner::new().missing("nmap"));
        let config = NetworkScannerConfig {
            control_port: port,
            probe_timeout: Duration::from_millis(300),
            strategy: SweepStrategy::Sweep,
            ..Default::default()
        };

        let scanner = NetworkDeviceScanner::new(config, runner.clone()).with_resolver(local_subnet());
        let devices = scanner.scan_for_android_tvs().await;
        assert!(devices.iter().any(|d| d.address == "127.0.0.1"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failing_nmap_falls_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("nmap", Scripted::Timeout)
                .on_stdout("ip neigh show", "127.0.0.1 dev lo lladdr 00:00:00:00:00:00 PERMANENT\n"),
        );
        let config = NetworkScannerConfig {
            control_port: port,
            strategy: SweepStrategy::Arp,
            ..Default::default()
        };

        let scanner = NetworkDeviceScanner::new(config, runner.clone())
            .with_resolver(local_subnet())
            .with_platform(Platform::Linux);
        let devices = scanner.scan_for_android_tvs().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, "127.0.0.1");
        assert_eq!(runner.call_count("ip neigh show"), 1);
    }

    #[tokio::test]
    async fn test_broken_tools_yield_empty_list() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_output("nmap", CommandOutput::failed(1, "permission denied"))
                .on_output("arp -a", CommandOutput::failed(1, "arp: not permitted")),
        );
        let scanner = NetworkDeviceScanner::new(NetworkScannerConfig::default(), runner)
            .with_resolver(local_subnet())
            .with_platform(Platform::Windows);
        assert!(scanner.scan_for_android_tvs().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_subnet_yields_empty_list() {
        let runner = Arc::new(ScriptedRunner::new());
        let scanner = NetworkDeviceScanner::new(NetworkScannerConfig::default(), runner.clone())
            .with_resolver(SubnetResolver::from_interfaces(Vec::new()));
        assert!(scanner.scan_for_android_tvs().await.is_empty());
        assert!(runner.calls().is_empty());
    }
}
