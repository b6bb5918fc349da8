//! Bluetooth peripheral enumeration and connection through platform tools
//!
//! - macOS: `blueutil`, JSON output
//! - Windows: PowerShell `Get-PnpDevice`, JSON output
//! - Linux: `bluetoothctl`, line output

use hearth_core::{DeviceDescriptor, DeviceType};
use hearth_shell::{
    CommandOutput, Outcome, OutcomeClassifier, PatternClassifier, Platform, SharedRunner,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ControlError;

/// MAC embedded in a PnP instance id, e.g. `BTHENUM\...\8&2A&0&A4C1381B2C7E_C00000000`
static PNP_MAC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:DEV_|&)([0-9A-Fa-f]{12})(?:_|\\|$)").expect("PnP MAC regex is valid")
});

/// `Device AA:BB:CC:DD:EE:FF Name`
static BLUETOOTHCTL_DEVICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Device\s+([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})\s+(.+)$")
        .expect("bluetoothctl device regex is valid")
});

const PNP_QUERY: &str = "Get-PnpDevice -Class Bluetooth | Where-Object {$_.Status -eq 'OK'} | Select-Object FriendlyName,InstanceId | ConvertTo-Json";

/// Bluetooth controller configuration
#[derive(Debug, Clone)]
pub struct BluetoothConfig {
    pub blueutil_program: String,
    pub bluetoothctl_program: String,
    pub powershell_program: String,
    /// Length of the nearby-device inquiry
    pub inquiry: Duration,
    /// Wait before re-checking a connection that did not confirm
    pub settle: Duration,
    /// Upper bound for one tool invocation
    pub command_timeout: Duration,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            blueutil_program: "blueutil".to_string(),
            bluetoothctl_program: "bluetoothctl".to_string(),
            powershell_program: "powershell".to_string(),
            inquiry: Duration::from_secs(10),
            settle: Duration::from_secs(2),
            command_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BluetoothScan {
    pub success: bool,
    pub devices: Vec<DeviceDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BluetoothScan {
    fn found(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            success: true,
            devices,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            devices: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectResult {
    pub success: bool,
    pub connected: bool,
    pub message: String,
}

impl ConnectResult {
    fn connected(message: String) -> Self {
        Self {
            success: true,
            connected: true,
            message,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            connected: false,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One device object from `blueutil --format json`
#[derive(Debug, Deserialize)]
struct BlueutilDevice {
    address: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    connected: bool,
    #[serde(default, rename = "RSSI")]
    rssi: Option<f64>,
}

pub struct BluetoothPeripheralController {
    config: BluetoothConfig,
    runner: SharedRunner,
    platform: Platform,
    connected: Mutex<HashSet<String>>,
}

impl BluetoothPeripheralController {
    pub fn new(config: BluetoothConfig, runner: SharedRunner) -> Self {
        Self {
            config,
            runner,
            platform: Platform::current(),
            connected: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Peripherals this controller connected and has not disconnected
    pub async fn connected_devices(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.connected.lock().await.iter().cloned().collect();
        ids.sort();
        ids
    }

    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> hearth_shell::Result<CommandOutput> {
        self.runner.run(program, args, timeout).await
    }

    /// Paired and nearby peripherals. Never fails; tool problems yield
    /// `success: false` with no devices.
    pub async fn scan_devices(&self) -> BluetoothScan {
        info!(platform = %self.platform, "Scanning for Bluetooth devices");
        let scan = match self.platform {
            Platform::MacOs => self.scan_blueutil().await,
            Platform::Windows => self.scan_pnp().await,
            Platform::Linux => self.scan_bluetoothctl().await,
            Platform::Other => BluetoothScan::failed(ControlError::UnsupportedPlatform(self.platform).to_string()),
        };
        info!("Found {} Bluetooth devices", scan.devices.len());
        scan
    }

    async fn scan_blueutil(&self) -> BluetoothScan {
        let program = self.config.blueutil_program.as_str();
        let paired = match self
            .run(program, &["--paired", "--format", "json"], self.config.command_timeout)
            .await
        {
            Ok(output) if output.success() => parse_blueutil_json(&output.stdout),
            Ok(output) => {
                warn!(stderr = %output.stderr.trim(), "blueutil --paired failed");
                return BluetoothScan::failed("Failed to list paired Bluetooth devices");
            }
            Err(e) => {
                warn!(error = %e, "blueutil --paired failed");
                return BluetoothScan::failed(e.to_string());
            }
        };

        let inquiry_secs = self.config.inquiry.as_secs().max(1).to_string();
        let inquiry_timeout = self.config.inquiry + self.config.command_timeout;
        let nearby = match self
            .run(program, &["--inquiry", inquiry_secs.as_str(), "--format", "json"], inquiry_timeout)
            .await
        {
            Ok(output) if output.success() => parse_blueutil_json(&output.stdout),
            Ok(output) => {
                warn!(stderr = %output.stderr.trim(), "Bluetooth inquiry failed, returning paired devices only");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Bluetooth inquiry failed, returning paired devices only");
                Vec::new()
            }
        };

        BluetoothScan::found(merge_paired_and_nearby(paired, nearby))
    }

    async fn scan_pnp(&self) -> BluetoothScan {
        let args = ["-NoProfile", "-NonInteractive", "-Command", PNP_QUERY];
        match self
            .run(&self.config.powershell_program, &args, self.config.command_timeout)
            .await
        {
            Ok(output) if output.success() => BluetoothScan::found(parse_pnp_json(&output.stdout)),
            Ok(output) => {
                warn!(stderr = %output.stderr.trim(), "Get-PnpDevice failed");
                BluetoothScan::failed("Failed to query Bluetooth devices")
            }
            Err(e) => {
                warn!(error = %e, "Get-PnpDevice failed");
                BluetoothScan::failed(e.to_string())
            }
        }
    }

    async fn scan_bluetoothctl(&self) -> BluetoothScan {
        match self
            .run(&self.config.bluetoothctl_program, &["devices"], self.config.command_timeout)
            .await
        {
            Ok(output) if output.success() => BluetoothScan::found(parse_bluetoothctl_devices(&output.stdout)),
            Ok(output) => {
                warn!(stderr = %output.stderr.trim(), "bluetoothctl devices failed");
                BluetoothScan::failed("Failed to list Bluetooth devices")
            }
            Err(e) => {
                warn!(error = %e, "bluetoothctl devices failed");
                BluetoothScan::failed(e.to_string())
            }
        }
    }

    /// Connect command and the classifier for its output
    fn connect_command(&self, id: &str) -> Option<(&str, Vec<String>, PatternClassifier)> {
        match self.platform {
            Platform::MacOs => Some((
                self.config.blueutil_program.as_str(),
                vec!["--connect".to_string(), id.to_string()],
                PatternClassifier::exit_status(),
            )),
            Platform::Linux => Some((
                self.config.bluetoothctl_program.as_str(),
                vec!["connect".to_string(), id.to_string()],
                PatternClassifier::bluetoothctl_connect(),
            )),
            Platform::Windows | Platform::Other => None,
        }
    }

    fn disconnect_command(&self, id: &str) -> Option<(&str, Vec<String>, PatternClassifier)> {
        match self.platform {
            Platform::MacOs => Some((
                self.config.blueutil_program.as_str(),
                vec!["--disconnect".to_string(), id.to_string()],
                PatternClassifier::exit_status(),
            )),
            Platform::Linux => Some((
                self.config.bluetoothctl_program.as_str(),
                vec!["disconnect".to_string(), id.to_string()],
                PatternClassifier::bluetoothctl_disconnect(),
            )),
            Platform::Windows | Platform::Other => None,
        }
    }

    /// Query the link state; `None` when the platform tool cannot tell
    pub async fn is_connected(&self, id: &str) -> Option<bool> {
        match self.platform {
            Platform::MacOs => {
                let output = self
                    .run(&self.config.blueutil_program, &["--is-connected", id], self.config.command_timeout)
                    .await
                    .ok()?;
                match output.stdout.trim() {
                    "1" => Some(true),
                    "0" => Some(false),
                    _ => None,
                }
            }
            Platform::Linux => {
                let output = self
                    .run(&self.config.bluetoothctl_program, &["info", id], self.config.command_timeout)
                    .await
                    .ok()?;
                output
                    .stdout
                    .lines()
                    .find_map(|line| line.trim().strip_prefix("Connected:"))
                    .map(|value| value.trim() == "yes")
            }
            Platform::Windows | Platform::Other => None,
        }
    }

    /// Connect, reconciling tool errors against the actual link state.
    /// Raw tool output is logged; messages returned are meant for users.
    pub async fn connect_device(&self, id: &str, name: &str) -> ConnectResult {
        let Some((program, args, classifier)) = self.connect_command(id) else {
            return ConnectResult::failed(format!(
                "{}. Connect {} from the system Bluetooth settings instead.",
                ControlError::UnsupportedPlatform(self.platform),
                name
            ));
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        info!(id = id, name = name, "Connecting Bluetooth device");
        match self.run(program, &args, self.config.command_timeout).await {
            Ok(output) => match classifier.classify(&output) {
                Outcome::Success => {
                    self.mark_connected(id).await;
                    return ConnectResult::connected(format!("Connected to {}", name));
                }
                Outcome::AlreadyDone => {
                    self.mark_connected(id).await;
                    return ConnectResult::connected(format!("{} is already connected", name));
                }
                Outcome::Failed(text) => {
                    warn!(id = id, output = %text, "Bluetooth connect reported failure");
                }
            },
            Err(e) if e.is_not_found() => {
                warn!(id = id, error = %e, "Bluetooth tool missing");
                return ConnectResult::failed(format!(
                    "Bluetooth control requires {}. Install it and try again.",
                    program
                ));
            }
            Err(e) if e.is_timeout() => {
                warn!(id = id, error = %e, "Bluetooth connect timed out");
            }
            Err(e) => {
                warn!(id = id, error = %e, "Bluetooth connect failed");
                return ConnectResult::failed(format!(
                    "Could not connect to {}. Make sure it is powered on and in range, then try again.",
                    name
                ));
            }
        }

        // The tool can fail while the link comes up anyway
        if self.is_connected(id).await == Some(true) {
            self.mark_connected(id).await;
            return ConnectResult::connected(format!("{} is already connected", name));
        }

        debug!(id = id, settle = ?self.config.settle, "Waiting for Bluetooth link to settle");
        tokio::time::sleep(self.config.settle).await;

        if self.is_connected(id).await == Some(true) {
            self.mark_connected(id).await;
            ConnectResult::connected(format!("Connected to {}", name))
        } else {
            ConnectResult::failed(format!(
                "Connection to {} timed out. Make sure it is powered on, in range and paired, then try again.",
                name
            ))
        }
    }

    /// Disconnect; the local connected-set changes only on success
    pub async fn disconnect_device(&self, id: &str) -> DisconnectResult {
        let Some((program, args, classifier)) = self.disconnect_command(id) else {
            return DisconnectResult {
                success: false,
                message: Some(ControlError::UnsupportedPlatform(self.platform).to_string()),
            };
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        info!(id = id, "Disconnecting Bluetooth device");
        let failure = match self.run(program, &args, self.config.command_timeout).await {
            Ok(output) => match classifier.classify(&output) {
                Outcome::Success | Outcome::AlreadyDone => {
                    self.connected.lock().await.remove(id);
                    return DisconnectResult {
                        success: true,
                        message: Some(format!("Disconnected {}", id)),
                    };
                }
                Outcome::Failed(text) => text,
            },
            Err(e) => e.to_string(),
        };

        warn!(id = id, error = %failure, "Bluetooth disconnect failed");
        DisconnectResult {
            success: false,
            message: Some(format!("Failed to disconnect {}", id)),
        }
    }

    async fn mark_connected(&self, id: &str) {
        self.connected.lock().await.insert(id.to_string());
    }
}

/// Lowercase, colon-separated hardware address
fn normalize_mac(raw: &str) -> String {
    raw.trim().replace('-', ":").to_ascii_lowercase()
}

fn parse_blueutil_json(raw: &str) -> Vec<BlueutilDevice> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Unparseable blueutil output");
            return Vec::new();
        }
    };
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<BlueutilDevice>(item).ok())
        .filter(|d| !d.address.trim().is_empty())
        .collect()
}

/// Paired devices win on address conflicts; nearby-only devices are
/// reported unpaired with their signal strength
fn merge_paired_and_nearby(paired: Vec<BlueutilDevice>, nearby: Vec<BlueutilDevice>) -> Vec<DeviceDescriptor> {
    let mut seen = HashSet::new();
    let mut devices = Vec::new();

    for (device, is_paired) in paired
        .into_iter()
        .map(|d| (d, true))
        .chain(nearby.into_iter().map(|d| (d, false)))
    {
        let address = normalize_mac(&device.address);
        if !seen.insert(address.clone()) {
            continue;
        }
        let name = device
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(address.as_str())
            .to_string();
        let signal = if is_paired {
            None
        } else {
            device.rssi.map(|r| r.round() as i32)
        };
        devices.push(
            DeviceDescriptor::new(name, DeviceType::Bluetooth, address)
                .with_paired(is_paired)
                .with_connected(device.connected)
                .with_signal(signal),
        );
    }
    devices
}

fn parse_pnp_json(raw: &str) -> Vec<DeviceDescriptor> {
    let value: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Unparseable Get-PnpDevice output");
            return Vec::new();
        }
    };
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| {
            let instance = item.get("InstanceId")?.as_str()?.trim();
            let name = item
                .get("FriendlyName")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(instance);
            let address = PNP_MAC
                .captures(instance)
                .map(|caps| format_compact_mac(&caps[1]))
                .unwrap_or_else(|| instance.to_string());
            seen.insert(address.clone()).then(|| {
                DeviceDescriptor::new(name, DeviceType::Bluetooth, address)
                    .with_paired(true)
                    .with_extra("instance_id", instance)
            })
        })
        .collect()
}

/// `A4C1381B2C7E` -> `a4:c1:38:1b:2c:7e`
fn format_compact_mac(compact: &str) -> String {
    compact
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse `bluetoothctl devices`: `Device AA:BB:CC:DD:EE:FF Name`
fn parse_bluetoothctl_devices(output: &str) -> Vec<DeviceDescriptor> {
    output
        .lines()
        .filter_map(|line| {
            let caps = BLUETOOTHCTL_DEVICE.captures(line.trim())?;
            let address = caps[1].to_string();
            let name = caps[2].trim().to_string();
            Some(DeviceDescriptor::new(name, DeviceType::Bluetooth, address).with_paired(true))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_shell::test_utils::{Scripted, ScriptedRunner};
    use std::sync::Arc;
    use tokio::time::Instant;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn controller(runner: Arc<ScriptedRunner>, platform: Platform) -> BluetoothPeripheralController {
        BluetoothPeripheralController::new(BluetoothConfig::default(), runner).with_platform(platform)
    }

    #[tokio::test]
    async fn test_macos_merge_paired_wins() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_stdout(
                    "blueutil --paired",
                    r#"[{"address":"aa-bb-cc-dd-ee-ff","name":"Headphones","connected":true,"paired":true}]"#,
                )
                .on_stdout(
                    "blueutil --inquiry",
                    r#"[{"address":"aa-bb-cc-dd-ee-ff","name":"Other","RSSI":-40},{"address":"11-22-33-44-55-66","name":"Speaker","RSSI":-71}]"#,
                ),
        );
        let scan = controller(runner.clone(), Platform::MacOs).scan_devices().await;

        assert!(scan.success);
        assert_eq!(scan.devices.len(), 2);
        let headphones = &scan.devices[0];
        assert_eq!(headphones.address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(headphones.name, "Headphones");
        assert!(headphones.paired && headphones.connected);
        assert_eq!(headphones.signal, None);
        let speaker = &scan.devices[1];
        assert!(!speaker.paired);
        assert_eq!(speaker.signal, Some(-71));
        assert_eq!(runner.call_count("blueutil --inquiry 10"), 1);
    }

    #[tokio::test]
    async fn test_macos_inquiry_failure_keeps_paired() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_stdout("blueutil --paired", r#"[{"address":"aa-bb-cc-dd-ee-ff","name":"Keyboard"}]"#)
                .on("blueutil --inquiry", Scripted::Timeout),
        );
        let scan = controller(runner, Platform::MacOs).scan_devices().await;
        assert!(scan.success);
        assert_eq!(scan.devices.len(), 1);
        assert!(scan.devices[0].paired);
    }

    #[tokio::test]
    async fn test_windows_pnp_single_object() {
        let runner = Arc::new(ScriptedRunner::new().on_stdout(
            "powershell",
            r#"{"FriendlyName":"Surface Mouse","InstanceId":"BTHLE\\DEV_A4C1381B2C7E\\7&2A5C1B3A&0&A4C1381B2C7E"}"#,
        ));
        let scan = controller(runner, Platform::Windows).scan_devices().await;
        assert!(scan.success);
        assert_eq!(scan.devices.len(), 1);
        assert_eq!(scan.devices[0].name, "Surface Mouse");
        assert_eq!(scan.devices[0].address, "a4:c1:38:1b:2c:7e");
        assert!(scan.devices[0].paired);
    }

    #[tokio::test]
    async fn test_windows_pnp_array_dedups_by_mac() {
        let runner = Arc::new(ScriptedRunner::new().on_stdout(
            "powershell",
            r#"[
                {"FriendlyName":"Headset","InstanceId":"BTHENUM\\{0000111E-0000-1000-8000-00805F9B34FB}_LOCALMFG&0002\\7&1A2B3C4D&0&A0B1C2D3E4F5_C00000000"},
                {"FriendlyName":"Headset Avrcp Transport","InstanceId":"BTHENUM\\{0000110E-0000-1000-8000-00805F9B34FB}_LOCALMFG&0002\\7&1A2B3C4D&0&A0B1C2D3E4F5_C00000000"},
                {"FriendlyName":"","InstanceId":"BTH\\MS_BTHPAN\\6&2D1C0E8&0&2"}
            ]"#,
        ));
        let scan = controller(runner, Platform::Windows).scan_devices().await;
        assert!(scan.success);
        assert_eq!(scan.devices.len(), 2);
        assert_eq!(scan.devices[0].name, "Headset");
        assert_eq!(scan.devices[0].address, "a0:b1:c2:d3:e4:f5");
        assert_eq!(scan.devices[1].address, r"BTH\MS_BTHPAN\6&2D1C0E8&0&2");
        assert_eq!(scan.devices[1].name, scan.devices[1].address);
    }

    #[tokio::test]
    async fn test_connect_without_cli_points_to_settings() {
        let runner = Arc::new(ScriptedRunner::new());
        for platform in [Platform::Windows, Platform::Other] {
            let controller = controller(runner.clone(), platform);

            let connected = controller.connect_device(MAC, "Headphones").await;
            assert!(!connected.success && !connected.connected);
            assert_eq!(
                connected.message,
                format!(
                    "Unsupported platform: {}. Connect Headphones from the system Bluetooth settings instead.",
                    platform
                )
            );

            let disconnected = controller.disconnect_device(MAC).await;
            assert!(!disconnected.success);
            assert_eq!(disconnected.message, Some(format!("Unsupported platform: {}", platform)));
            assert!(controller.connected_devices().await.is_empty());
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_linux_device_lines() {
        let runner = Arc::new(ScriptedRunner::new().on_stdout(
            "bluetoothctl devices",
            "Device AA:BB:CC:DD:EE:FF Living Room Speaker\nDevice 11:22:33:44:55:66 Keyboard K380\nnoise\n",
        ));
        let scan = controller(runner, Platform::Linux).scan_devices().await;
        assert_eq!(scan.devices.len(), 2);
        assert_eq!(scan.devices[0].name, "Living Room Speaker");
        assert!(scan.devices.iter().all(|d| d.paired && !d.connected));
    }

    #[tokio::test]
    async fn test_missing_tool_and_unsupported_platform() {
        let runner = Arc::new(ScriptedRunner::new().missing("bluetoothctl"));
        let scan = controller(runner.clone(), Platform::Linux).scan_devices().await;
        assert!(!scan.success);
        assert!(scan.devices.is_empty());

        let scan = controller(runner, Platform::Other).scan_devices().await;
        assert!(!scan.success);
        assert!(scan.devices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_but_already_linked() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_output("blueutil --connect", CommandOutput::failed(1, "Failed to connect"))
                .on_stdout("blueutil --is-connected", "1\n"),
        );
        let controller = controller(runner.clone(), Platform::MacOs);

        let started = Instant::now();
        let result = controller.connect_device(MAC, "Headphones").await;
        assert!(result.success && result.connected);
        assert_eq!(result.message, "Headphones is already connected");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(controller.connected_devices().await, vec![MAC.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_settles_then_rechecks() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("bluetoothctl connect", Scripted::Timeout)
                .on_stdout("bluetoothctl info", "Device AA:BB:CC:DD:EE:FF\n\tConnected: no\n")
                .on_stdout("bluetoothctl info", "Device AA:BB:CC:DD:EE:FF\n\tConnected: yes\n"),
        );
        let controller = controller(runner.clone(), Platform::Linux);

        let started = Instant::now();
        let result = controller.connect_device(MAC, "Speaker").await;
        assert!(result.success);
        assert_eq!(result.message, "Connected to Speaker");
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(runner.call_count("bluetoothctl info"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_recheck() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_output("bluetoothctl connect", CommandOutput::ok("Failed to connect: org.bluez.Error.Failed\n"))
                .on_stdout("bluetoothctl info", "\tConnected: no\n"),
        );
        let controller = controller(runner, Platform::Linux);

        let result = controller.connect_device(MAC, "Speaker").await;
        assert!(!result.success);
        assert!(!result.connected);
        assert!(result.message.contains("try again"));
        assert!(!result.message.contains("org.bluez"));
        assert!(controller.connected_devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_failure_keeps_state() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_stdout("bluetoothctl connect", "Connection successful\n")
                .on_output("bluetoothctl disconnect", CommandOutput::failed(1, "Failed to disconnect: org.bluez.Error"))
                .on_stdout("bluetoothctl disconnect", "Successful disconnected\n"),
        );
        let controller = controller(runner, Platform::Linux);

        assert!(controller.connect_device(MAC, "Speaker").await.success);
        let result = controller.disconnect_device(MAC).await;
        assert!(!result.success);
        assert!(result.message.is_some());
        assert_eq!(controller.connected_devices().await, vec![MAC.to_string()]);

        assert!(controller.disconnect_device(MAC).await.success);
        assert!(controller.connected_devices().await.is_empty());
    }
}
