//! Device orchestrator
//!
//! Owns the registry of connected devices and routes discovery and control
//! requests to the scanner or controller for each device type. Android TV
//! and Bluetooth actions reach real devices; chromecast and projector
//! actions are acknowledged without contacting the device.

use hearth_core::{Capability, ConnectedDevice, ControlOutcome, DeviceDescriptor, DeviceId, DeviceType};
use hearth_discovery::{MulticastDeviceScanner, NetworkDeviceScanner};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bluetooth::BluetoothPeripheralController;
use crate::error::{ControlError, Result};
use crate::remote_shell::RemoteShellDeviceController;

/// Result of a pairing request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<ConnectedDevice>,
}

impl PairOutcome {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            device: None,
        }
    }
}

pub struct DeviceOrchestrator {
    network: NetworkDeviceScanner,
    multicast: Option<MulticastDeviceScanner>,
    bluetooth: BluetoothPeripheralController,
    remote_shell: RemoteShellDeviceController,
    registry: RwLock<HashMap<DeviceId, ConnectedDevice>>,
}

impl DeviceOrchestrator {
    pub fn new(
        network: NetworkDeviceScanner,
        bluetooth: BluetoothPeripheralController,
        remote_shell: RemoteShellDeviceController,
    ) -> Self {
        Self {
            network,
            multicast: None,
            bluetooth,
            remote_shell,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Enable chromecast scanning
    pub fn with_multicast(mut self, multicast: MulticastDeviceScanner) -> Self {
        self.multicast = Some(multicast);
        self
    }

    pub fn remote_shell(&self) -> &RemoteShellDeviceController {
        &self.remote_shell
    }

    pub fn bluetooth(&self) -> &BluetoothPeripheralController {
        &self.bluetooth
    }

    /// Scan for devices of one type. Scanner failures yield an empty list;
    /// only types without a scanner are errors.
    pub async fn scan(&self, device_type: DeviceType, duration: Option<Duration>) -> Result<Vec<DeviceDescriptor>> {
        match device_type {
            DeviceType::AndroidTv => Ok(self.network.scan_for_android_tvs().await),
            DeviceType::Chromecast => match &self.multicast {
                Some(multicast) => {
                    let duration = duration.unwrap_or_else(|| multicast.default_duration());
                    Ok(multicast.scan(duration).await)
                }
                None => {
                    warn!("Multicast discovery is unavailable, no chromecast scan performed");
                    Ok(Vec::new())
                }
            },
            DeviceType::Bluetooth => Ok(self.bluetooth.scan_devices().await.devices),
            other => Err(ControlError::UnsupportedDeviceType(other)),
        }
    }

    /// Android TVs currently attached to the bridge over the network.
    /// Empty when the bridge tool is not installed.
    pub async fn discover_devices(&self) -> Vec<DeviceDescriptor> {
        if !self.remote_shell.is_available() {
            debug!("Remote shell tool not available, skipping discovery");
            return Vec::new();
        }

        self.remote_shell
            .list_devices()
            .await
            .into_iter()
            .filter(|device| device.is_online())
            .filter_map(|device| {
                let (host, port) = device.network_endpoint()?;
                Some(
                    DeviceDescriptor::new(format!("Android TV ({})", host), DeviceType::AndroidTv, host)
                        .with_id(DeviceId::from(device.serial.as_str()))
                        .with_port(port)
                        .with_connected(true),
                )
            })
            .collect()
    }

    /// Pair a device. Bluetooth pairing is a connect; Android TV optionally
    /// pairs with a code first, then connects on the default port.
    pub async fn pair(
        &self,
        device_id: &str,
        device_type: DeviceType,
        code: Option<&str>,
        name: Option<&str>,
    ) -> Result<PairOutcome> {
        match device_type {
            DeviceType::Bluetooth => {
                let result = self
                    .bluetooth
                    .connect_device(device_id, name.unwrap_or(device_id))
                    .await;
                if !result.success {
                    return Ok(PairOutcome::failed(result.message));
                }
                let device = self.register(device_type, device_id.to_string()).await;
                Ok(PairOutcome {
                    success: true,
                    message: result.message,
                    device: Some(device),
                })
            }
            DeviceType::AndroidTv => {
                let target = match code {
                    Some(code) => {
                        let paired = self.remote_shell.pair(device_id, code).await;
                        if !paired.success {
                            return Ok(PairOutcome::failed(paired.message));
                        }
                        let (host, _) = split_host_port(device_id, self.remote_shell.default_port())?;
                        format!("{}:{}", host, self.remote_shell.default_port())
                    }
                    None => device_id.to_string(),
                };

                match self.connect(DeviceType::AndroidTv, &target).await {
                    Ok(device) => Ok(PairOutcome {
                        success: true,
                        message: format!("Paired with {}", name.unwrap_or(device.address.as_str())),
                        device: Some(device),
                    }),
                    Err(ControlError::ConnectFailed { reason, .. }) => Ok(PairOutcome::failed(reason)),
                    Err(e) => Err(e),
                }
            }
            other => Err(ControlError::UnsupportedDeviceType(other)),
        }
    }

    /// Connect and record the device. Android TV and Bluetooth connect for
    /// real; chromecast and projector entries are registry records only.
    pub async fn connect(&self, device_type: DeviceType, address: &str) -> Result<ConnectedDevice> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ControlError::InvalidAddress(address.to_string()));
        }

        let record_address = match device_type {
            DeviceType::AndroidTv => {
                let (host, port) = split_host_port(address, self.remote_shell.default_port())?;
                let result = self.remote_shell.connect_to_tv(&host, port).await;
                if !result.success {
                    return Err(ControlError::ConnectFailed {
                        address: result.device_id,
                        reason: result.message,
                    });
                }
                result.device_id
            }
            DeviceType::Bluetooth => {
                let result = self.bluetooth.connect_device(address, address).await;
                if !result.success {
                    return Err(ControlError::ConnectFailed {
                        address: address.to_string(),
                        reason: result.message,
                    });
                }
                address.to_string()
            }
            DeviceType::Chromecast | DeviceType::Projector => address.to_string(),
            other => return Err(ControlError::UnsupportedDeviceType(other)),
        };

        Ok(self.register(device_type, record_address).await)
    }

    async fn register(&self, device_type: DeviceType, address: String) -> ConnectedDevice {
        let id = DeviceId::synthesize(device_type, &address);
        let device = ConnectedDevice::new(id.clone(), device_type, address);
        self.registry.write().await.insert(id, device.clone());
        info!(id = %device.id, "Device connected");
        device
    }

    /// Run `action` on a connected device
    pub async fn control(
        &self,
        device_id: &DeviceId,
        action: &str,
        params: &HashMap<String, String>,
    ) -> Result<ControlOutcome> {
        let device = self
            .registry
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| ControlError::device_not_found(device_id))?;

        match device.device_type {
            DeviceType::AndroidTv => {
                let mut outcome = self.remote_shell.control_tv(action, &device.address, params).await;
                outcome.device_id = device.id;
                Ok(outcome)
            }
            DeviceType::Bluetooth => self.control_bluetooth(&device, action).await,
            _ => {
                let capability = Capability::for_action(action)
                    .ok_or_else(|| ControlError::UnknownAction(action.to_string()))?;
                if !device.supports(capability) {
                    return Ok(ControlOutcome::failed(
                        action,
                        &device.id,
                        format!("{} devices do not support {}", device.device_type, action),
                    ));
                }
                debug!(id = %device.id, action = action, "Acknowledging control action");
                Ok(ControlOutcome::acknowledged(action, &device.id))
            }
        }
    }

    async fn control_bluetooth(&self, device: &ConnectedDevice, action: &str) -> Result<ControlOutcome> {
        match action {
            "connect" => {
                let result = self.bluetooth.connect_device(&device.address, &device.address).await;
                Ok(if result.success {
                    ControlOutcome::succeeded(action, &device.id, result.message)
                } else {
                    ControlOutcome::failed(action, &device.id, result.message)
                })
            }
            "disconnect" => {
                let result = self.bluetooth.disconnect_device(&device.address).await;
                let message = result.message.unwrap_or_default();
                if result.success {
                    self.registry.write().await.remove(&device.id);
                    Ok(ControlOutcome::succeeded(action, &device.id, message))
                } else {
                    Ok(ControlOutcome::failed(action, &device.id, message))
                }
            }
            other => Err(ControlError::UnknownAction(other.to_string())),
        }
    }

    /// Remove a device from the registry and tear down its link
    pub async fn disconnect(&self, device_id: &DeviceId) -> Result<ConnectedDevice> {
        let device = self
            .registry
            .write()
            .await
            .remove(device_id)
            .ok_or_else(|| ControlError::device_not_found(device_id))?;
        self.teardown(&device).await;
        info!(id = %device.id, "Device disconnected");
        Ok(device)
    }

    /// Disconnect everything; returns how many devices were registered
    pub async fn disconnect_all(&self) -> usize {
        let devices: Vec<ConnectedDevice> = self.registry.write().await.drain().map(|(_, d)| d).collect();
        for device in &devices {
            self.teardown(device).await;
        }
        info!("Disconnected {} devices", devices.len());
        devices.len()
    }

    pub async fn connected_devices(&self) -> Vec<ConnectedDevice> {
        let mut devices: Vec<_> = self.registry.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    async fn teardown(&self, device: &ConnectedDevice) {
        match device.device_type {
            DeviceType::AndroidTv => {
                let result = self.remote_shell.disconnect_from_tv(&device.address).await;
                if !result.success {
                    warn!(id = %device.id, error = %result.message, "Remote shell disconnect failed");
                }
            }
            DeviceType::Bluetooth => {
                let result = self.bluetooth.disconnect_device(&device.address).await;
                if !result.success {
                    warn!(id = %device.id, error = ?result.message, "Bluetooth disconnect failed");
                }
            }
            _ => {}
        }
    }
}

/// Split `host[:port]`, using `default_port` when none is given
fn split_host_port(address: &str, default_port: u16) -> Result<(String, u16)> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .map_err(|_| ControlError::InvalidAddress(address.to_string()))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(ControlError::InvalidAddress(address.to_string())),
        None => Ok((address.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::BluetoothConfig;
    use crate::remote_shell::RemoteShellConfig;
    use hearth_discovery::test_utils::{cast_service, ScriptedBrowser};
    use hearth_discovery::{MulticastConfig, NetworkScannerConfig, SubnetResolver};
    use hearth_shell::test_utils::ScriptedRunner;
    use hearth_shell::{Platform, SharedRunner};
    use std::sync::Arc;

    fn orchestrator(runner: Arc<ScriptedRunner>) -> DeviceOrchestrator {
        let shared: SharedRunner = runner;
        let network = NetworkDeviceScanner::new(NetworkScannerConfig::default(), shared.clone())
            .with_resolver(SubnetResolver::from_interfaces(Vec::new()));
        let bluetooth = BluetoothPeripheralController::new(BluetoothConfig::default(), shared.clone())
            .with_platform(Platform::Linux);
        let remote_shell = RemoteShellDeviceController::new(RemoteShellConfig::default(), shared);
        DeviceOrchestrator::new(network, bluetooth, remote_shell)
    }

    fn adb_runner() -> Arc<ScriptedRunner> {
        Arc::new(
            ScriptedRunner::new()
                .on_stdout("adb connect", "connected to 10.0.0.5:5555\n")
                .on_stdout("adb disconnect", "disconnected 10.0.0.5:5555\n")
                .on_stdout("adb -s", ""),
        )
    }

    #[tokio::test]
    async fn test_control_unknown_device() {
        let orchestrator = orchestrator(Arc::new(ScriptedRunner::new()));
        orchestrator.connect(DeviceType::Chromecast, "10.0.0.7").await.unwrap();

        let err = orchestrator
            .control(&DeviceId::from("nope"), "power-on", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::DeviceNotFound { .. }));
        assert_eq!(err.to_string(), "Device not found");
        assert_eq!(orchestrator.connected_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_reports_prior_count() {
        let orchestrator = orchestrator(Arc::new(ScriptedRunner::new()));
        orchestrator.connect(DeviceType::Chromecast, "10.0.0.7").await.unwrap();
        orchestrator.connect(DeviceType::Projector, "10.0.0.8").await.unwrap();
        orchestrator.connect(DeviceType::Chromecast, "10.0.0.9").await.unwrap();

        assert_eq!(orchestrator.disconnect_all().await, 3);
        assert!(orchestrator.connected_devices().await.is_empty());
        assert_eq!(orchestrator.disconnect_all().await, 0);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_one_entry() {
        let orchestrator = orchestrator(Arc::new(ScriptedRunner::new()));
        let first = orchestrator.connect(DeviceType::Chromecast, "10.0.0.7").await.unwrap();
        let second = orchestrator.connect(DeviceType::Chromecast, "10.0.0.7").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id.as_str(), "chromecast-10.0.0.7");
        assert_eq!(orchestrator.connected_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_android_tv_connect_control_disconnect() {
        let runner = adb_runner();
        let orchestrator = orchestrator(runner.clone());

        let device = orchestrator.connect(DeviceType::AndroidTv, "10.0.0.5").await.unwrap();
        assert_eq!(device.address, "10.0.0.5:5555");
        assert_eq!(device.id.as_str(), "android-tv-10.0.0.5:5555");
        assert!(device.supports(Capability::LaunchApp));

        let outcome = orchestrator
            .control(&device.id, "volume-up", &HashMap::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.device_id, device.id);
        assert_eq!(runner.call_count("adb -s 10.0.0.5:5555 shell input keyevent 24"), 1);

        orchestrator.disconnect(&device.id).await.unwrap();
        assert_eq!(runner.call_count("adb disconnect 10.0.0.5:5555"), 1);
        assert!(orchestrator.remote_shell().sessions().await.is_empty());
        assert!(orchestrator.disconnect(&device.id).await.is_err());
    }

    #[tokio::test]
    async fn test_android_tv_connect_failure_leaves_registry_empty() {
        let runner = Arc::new(ScriptedRunner::new().on_stdout(
            "adb connect",
            "failed to connect to '10.0.0.5:5555': No route to host\n",
        ));
        let orchestrator = orchestrator(runner);

        let err = orchestrator.connect(DeviceType::AndroidTv, "10.0.0.5:5555").await.unwrap_err();
        assert!(matches!(err, ControlError::ConnectFailed { .. }));
        assert!(orchestrator.connected_devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_chromecast_control_is_acknowledged_only() {
        let runner = Arc::new(ScriptedRunner::new());
        let orchestrator = orchestrator(runner.clone());
        let device = orchestrator.connect(DeviceType::Chromecast, "10.0.0.7").await.unwrap();

        let outcome = orchestrator.control(&device.id, "volume-up", &HashMap::new()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.acknowledged_only);

        let outcome = orchestrator.control(&device.id, "power-on", &HashMap::new()).await.unwrap();
        assert!(!outcome.success);

        let err = orchestrator.control(&device.id, "warp", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ControlError::UnknownAction(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_types() {
        let orchestrator = orchestrator(Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            orchestrator.connect(DeviceType::SmartHome, "10.0.0.2").await,
            Err(ControlError::UnsupportedDeviceType(DeviceType::SmartHome))
        ));
        assert!(matches!(
            orchestrator.scan(DeviceType::Projector, None).await,
            Err(ControlError::UnsupportedDeviceType(DeviceType::Projector))
        ));
    }

    #[tokio::test]
    async fn test_discover_without_bridge_tool() {
        let runner = Arc::new(ScriptedRunner::new().missing("adb"));
        let orchestrator = orchestrator(runner.clone());
        assert!(orchestrator.discover_devices().await.is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_discover_lists_network_sessions() {
        let runner = Arc::new(ScriptedRunner::new().on_stdout(
            "adb devices",
            "List of devices attached\n10.0.0.5:5555\tdevice\nR58M123\tdevice\n10.0.0.6:5555\toffline\n",
        ));
        let orchestrator = orchestrator(runner);

        let devices = orchestrator.discover_devices().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id.as_str(), "10.0.0.5:5555");
        assert_eq!(devices[0].address, "10.0.0.5");
        assert_eq!(devices[0].port, Some(5555));
        assert!(devices[0].connected);
    }

    #[tokio::test]
    async fn test_pair_android_tv_with_code() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_stdout("adb pair", "Successfully paired to 10.0.0.5:37123 [guid=adb-XYZ]\n")
                .on_stdout("adb connect", "connected to 10.0.0.5:5555\n"),
        );
        let orchestrator = orchestrator(runner.clone());

        let outcome = orchestrator
            .pair("10.0.0.5:37123", DeviceType::AndroidTv, Some("482913"), Some("Living Room"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "Paired with Living Room");
        assert_eq!(outcome.device.unwrap().address, "10.0.0.5:5555");
        assert_eq!(
            runner.calls(),
            vec![
                "adb pair 10.0.0.5:37123 482913".to_string(),
                "adb connect 10.0.0.5:5555".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_bluetooth_pair_and_disconnect_action() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_stdout("bluetoothctl connect", "Connection successful\n")
                .on_stdout("bluetoothctl disconnect", "Successful disconnected\n"),
        );
        let orchestrator = orchestrator(runner);

        let outcome = orchestrator
            .pair("AA:BB:CC:DD:EE:FF", DeviceType::Bluetooth, None, Some("Speaker"))
            .await
            .unwrap();
        assert!(outcome.success);
        let device = outcome.device.unwrap();

        let result = orchestrator.control(&device.id, "disconnect", &HashMap::new()).await.unwrap();
        assert!(result.success);
        assert!(orchestrator.connected_devices().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_routes_by_type() {
        let runner = Arc::new(ScriptedRunner::new());
        let browser = Arc::new(ScriptedBrowser::new(vec![(
            Duration::from_millis(10),
            cast_service("10.0.0.7", Some("Kitchen"), None),
        )]));
        let orchestrator = orchestrator(runner)
            .with_multicast(MulticastDeviceScanner::new(MulticastConfig::default(), browser));

        let casts = orchestrator
            .scan(DeviceType::Chromecast, Some(Duration::from_millis(500)))
            .await
            .unwrap();
        assert_eq!(casts.len(), 1);
        assert_eq!(casts[0].name, "Kitchen");

        // No interface to derive a subnet from
        assert!(orchestrator.scan(DeviceType::AndroidTv, None).await.unwrap().is_empty());
    }
}
