//! Hearth - Main entry point
//!
//! Discovers and controls Android TVs, Chromecast receivers and Bluetooth
//! peripherals on the local network. Results are printed as JSON on stdout;
//! logs go to stderr.

mod config;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hearth_control::{
    BluetoothPeripheralController, DeviceOrchestrator, RemoteShellDeviceController,
};
use hearth_core::DeviceType;
use hearth_discovery::{MdnsBrowser, MulticastDeviceScanner, NetworkDeviceScanner, SubnetResolver};
use hearth_shell::SystemCommandRunner;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(about = "Local network device discovery and control")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "hearth.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan for devices of one type
    Scan {
        #[arg(value_enum)]
        device_type: DeviceKind,
        /// Browse window for multicast scans
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// List Android TVs attached to the remote-shell bridge
    Discover,
    /// Pair with a device
    Pair {
        device_id: String,
        #[arg(value_enum)]
        device_type: DeviceKind,
        /// Pairing code shown on the device
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Connect to a device and print its registry entry
    Connect {
        #[arg(value_enum)]
        device_type: DeviceKind,
        address: String,
    },
    /// Connect to a device and run one action on it
    Control {
        #[arg(value_enum)]
        device_type: DeviceKind,
        address: String,
        action: String,
        /// Action parameter as key=value, repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Model, OS version, battery, resolution, power state and foreground app of an Android TV
    Info {
        /// address[:port]
        address: String,
    },
    /// List remote-shell control actions
    Actions,
    /// Write a default configuration file to the --config path
    InitConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DeviceKind {
    Bluetooth,
    AndroidTv,
    Chromecast,
    Projector,
    SmartHome,
    Mobile,
}

impl From<DeviceKind> for DeviceType {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Bluetooth => DeviceType::Bluetooth,
            DeviceKind::AndroidTv => DeviceType::AndroidTv,
            DeviceKind::Chromecast => DeviceType::Chromecast,
            DeviceKind::Projector => DeviceType::Projector,
            DeviceKind::SmartHome => DeviceType::SmartHome,
            DeviceKind::Mobile => DeviceType::Mobile,
        }
    }
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoReport {
    #[serde(flatten)]
    info: hearth_control::TvInfo,
    is_on: bool,
    current_app: hearth_control::remote_shell::CurrentApp,
}

fn build_orchestrator(config: &Config) -> DeviceOrchestrator {
    let runner = SystemCommandRunner::shared();

    let mut network = NetworkDeviceScanner::new(config.to_network_config(), runner.clone());
    if let Some(subnet) = config.subnet_override() {
        network = network.with_resolver(SubnetResolver::with_override(subnet));
    }
    let bluetooth = BluetoothPeripheralController::new(config.to_bluetooth_config(), runner.clone());
    let remote_shell = RemoteShellDeviceController::new(config.to_remote_shell_config(), runner);

    let orchestrator = DeviceOrchestrator::new(network, bluetooth, remote_shell);
    match MdnsBrowser::new() {
        Ok(browser) => orchestrator.with_multicast(MulticastDeviceScanner::new(
            config.to_multicast_config(),
            Arc::new(browser),
        )),
        Err(e) => {
            warn!(error = %e, "mDNS unavailable, chromecast discovery disabled");
            orchestrator
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    debug!("Hearth v{}", env!("CARGO_PKG_VERSION"));

    if let Command::InitConfig = args.command {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    let config = config::load_config(&args.config)?;

    if let Command::Actions = args.command {
        return print_json(&hearth_control::remote_shell::action_names());
    }

    let orchestrator = build_orchestrator(&config);

    match args.command {
        Command::Scan {
            device_type,
            duration_ms,
        } => {
            let devices = orchestrator
                .scan(device_type.into(), duration_ms.map(Duration::from_millis))
                .await?;
            info!("Found {} devices", devices.len());
            print_json(&devices)?;
        }
        Command::Discover => {
            print_json(&orchestrator.discover_devices().await)?;
        }
        Command::Pair {
            device_id,
            device_type,
            code,
            name,
        } => {
            let outcome = orchestrator
                .pair(&device_id, device_type.into(), code.as_deref(), name.as_deref())
                .await?;
            print_json(&outcome)?;
        }
        Command::Connect {
            device_type,
            address,
        } => {
            let device = orchestrator.connect(device_type.into(), &address).await?;
            print_json(&device)?;
        }
        Command::Control {
            device_type,
            address,
            action,
            params,
        } => {
            let device = orchestrator.connect(device_type.into(), &address).await?;
            let params: HashMap<String, String> = params.into_iter().collect();
            let outcome = orchestrator.control(&device.id, &action, &params).await?;
            print_json(&outcome)?;
        }
        Command::Info { address } => {
            let remote_shell = orchestrator.remote_shell();
            let device_id = if address.contains(':') {
                address
            } else {
                format!("{}:{}", address, remote_shell.default_port())
            };
            let (host, port) = device_id
                .rsplit_once(':')
                .and_then(|(host, port)| Some((host.to_string(), port.parse::<u16>().ok()?)))
                .ok_or_else(|| anyhow!("Invalid address: {}", device_id))?;

            let connected = remote_shell.connect_to_tv(&host, port).await;
            if !connected.success {
                return Err(anyhow!("Failed to connect to {}: {}", device_id, connected.message));
            }

            let (info, is_on, current_app) = tokio::join!(
                remote_shell.get_tv_info(&device_id),
                remote_shell.is_tv_on(&device_id),
                remote_shell.get_current_app(&device_id),
            );
            print_json(&InfoReport {
                info,
                is_on,
                current_app,
            })?;
        }
        Command::Actions | Command::InitConfig => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("url=https://example.com/?a=b").unwrap(),
            ("url".to_string(), "https://example.com/?a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_cli_parses_control() {
        let args = Args::try_parse_from([
            "hearth",
            "control",
            "android-tv",
            "10.0.0.5",
            "launch-app",
            "--param",
            "app=netflix",
        ])
        .unwrap();
        match args.command {
            Command::Control {
                device_type,
                action,
                params,
                ..
            } => {
                assert_eq!(DeviceType::from(device_type), DeviceType::AndroidTv);
                assert_eq!(action, "launch-app");
                assert_eq!(params, vec![("app".to_string(), "netflix".to_string())]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_type() {
        assert!(Args::try_parse_from(["hearth", "scan", "toaster"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
