//! Configuration loading

use anyhow::{bail, Result};
use hearth_control::{BluetoothConfig, RemoteShellConfig};
use hearth_discovery::{MulticastConfig, NetworkScannerConfig, SubnetInfo, SweepStrategy};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub multicast: MulticastSection,
    #[serde(default)]
    pub bluetooth: BluetoothSection,
    #[serde(default)]
    pub remote_shell: RemoteShellSection,
}

/// External tool names or paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_adb")]
    pub adb: String,
    #[serde(default = "default_nmap")]
    pub nmap: String,
    #[serde(default = "default_blueutil")]
    pub blueutil: String,
    #[serde(default = "default_bluetoothctl")]
    pub bluetoothctl: String,
    #[serde(default = "default_powershell")]
    pub powershell: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            adb: default_adb(),
            nmap: default_nmap(),
            blueutil: default_blueutil(),
            bluetoothctl: default_bluetoothctl(),
            powershell: default_powershell(),
        }
    }
}

fn default_adb() -> String {
    "adb".to_string()
}

fn default_nmap() -> String {
    "nmap".to_string()
}

fn default_blueutil() -> String {
    "blueutil".to_string()
}

fn default_bluetoothctl() -> String {
    "bluetoothctl".to_string()
}

fn default_powershell() -> String {
    "powershell".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port Android TVs accept remote-shell connections on
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Per-host TCP probe timeout
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_nmap_timeout_secs")]
    pub nmap_timeout_secs: u64,
    /// auto, sweep or arp
    #[serde(default)]
    pub strategy: SweepStrategy,
    /// Scan this /24 instead of the one derived from the interfaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<Ipv4Addr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            control_port: default_control_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
            nmap_timeout_secs: default_nmap_timeout_secs(),
            strategy: SweepStrategy::default(),
            subnet: None,
        }
    }
}

fn default_control_port() -> u16 {
    5555
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_nmap_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MulticastSection {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
}

impl Default for MulticastSection {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            scan_duration_ms: default_scan_duration_ms(),
        }
    }
}

fn default_service_type() -> String {
    hearth_discovery::GOOGLECAST_SERVICE.to_string()
}

fn default_scan_duration_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothSection {
    /// Nearby-device inquiry length
    #[serde(default = "default_inquiry_secs")]
    pub inquiry_secs: u64,
    /// Wait before re-checking an unconfirmed connection
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_bluetooth_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for BluetoothSection {
    fn default() -> Self {
        Self {
            inquiry_secs: default_inquiry_secs(),
            settle_ms: default_settle_ms(),
            command_timeout_secs: default_bluetooth_timeout_secs(),
        }
    }
}

fn default_inquiry_secs() -> u64 {
    10
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_bluetooth_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteShellSection {
    #[serde(default = "default_control_port")]
    pub default_port: u16,
    #[serde(default = "default_remote_shell_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for RemoteShellSection {
    fn default() -> Self {
        Self {
            default_port: default_control_port(),
            command_timeout_secs: default_remote_shell_timeout_secs(),
        }
    }
}

fn default_remote_shell_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn to_network_config(&self) -> NetworkScannerConfig {
        NetworkScannerConfig {
            control_port: self.network.control_port,
            probe_timeout: Duration::from_millis(self.network.probe_timeout_ms),
            nmap_timeout: Duration::from_secs(self.network.nmap_timeout_secs),
            nmap_program: self.tools.nmap.clone(),
            strategy: self.network.strategy,
        }
    }

    /// Fixed subnet from the configuration, if any
    pub fn subnet_override(&self) -> Option<SubnetInfo> {
        self.network.subnet.map(SubnetInfo::from_subnet)
    }

    pub fn to_multicast_config(&self) -> MulticastConfig {
        MulticastConfig {
            service_type: self.multicast.service_type.clone(),
            scan_duration: Duration::from_millis(self.multicast.scan_duration_ms),
        }
    }

    pub fn to_bluetooth_config(&self) -> BluetoothConfig {
        BluetoothConfig {
            blueutil_program: self.tools.blueutil.clone(),
            bluetoothctl_program: self.tools.bluetoothctl.clone(),
            powershell_program: self.tools.powershell.clone(),
            inquiry: Duration::from_secs(self.bluetooth.inquiry_secs),
            settle: Duration::from_millis(self.bluetooth.settle_ms),
            command_timeout: Duration::from_secs(self.bluetooth.command_timeout_secs),
        }
    }

    pub fn to_remote_shell_config(&self) -> RemoteShellConfig {
        RemoteShellConfig {
            adb_program: self.tools.adb.clone(),
            default_port: self.remote_shell.default_port,
            command_timeout: Duration::from_secs(self.remote_shell.command_timeout_secs),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Write the default configuration, refusing to overwrite an existing file
pub fn save_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("hearth.toml")).unwrap();
        assert_eq!(config.network.control_port, 5555);
        assert_eq!(config.network.strategy, SweepStrategy::Auto);
        assert_eq!(config.multicast.service_type, "_googlecast._tcp.local.");
        assert_eq!(config.tools.adb, "adb");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[network]\nstrategy = \"arp\"\nsubnet = \"10.1.2.0\"\n\n[tools]\nadb = \"/opt/platform-tools/adb\"\n\n[bluetooth]\nsettle_ms = 500\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.network.strategy, SweepStrategy::Arp);
        assert_eq!(config.network.probe_timeout_ms, 500);
        assert_eq!(config.subnet_override().unwrap().cidr(), "10.1.2.0/24");
        assert_eq!(config.to_remote_shell_config().adb_program, "/opt/platform-tools/adb");
        assert_eq!(config.to_bluetooth_config().settle, Duration::from_millis(500));
        assert_eq!(config.to_bluetooth_config().inquiry, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\ncontrol_port = \"not a port\"").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_saved_defaults_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hearth.toml");
        save_default_config(&path).unwrap();
        assert!(save_default_config(&path).is_err());

        let config = load_config(&path).unwrap();
        assert_eq!(config.remote_shell.default_port, 5555);
        assert_eq!(config.to_multicast_config().scan_duration, Duration::from_secs(5));
        assert_eq!(config.to_network_config().nmap_timeout, Duration::from_secs(30));
    }
}
