//! Android TV control over the Android debug bridge
//!
//! Sessions are keyed `address:port`, which is also the serial `adb -s`
//! targets. Actions go through a fixed dispatch table; names not in the
//! table never reach the bridge.

use chrono::{DateTime, Utc};
use hearth_core::{ConnectionStatus, ControlOutcome, DeviceId};
use hearth_shell::{
    CommandOutput, Outcome, OutcomeClassifier, PatternClassifier, SharedRunner,
};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};

/// Default remote-shell port
pub const DEFAULT_PORT: u16 = 5555;

const UNKNOWN: &str = "unknown";
const BATTERY_UNKNOWN: &str = "N/A";

static BATTERY_LEVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*level:\s*(\d+)").expect("battery level regex is valid"));

static DISPLAY_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(Override|Physical) size:\s*(\d+x\d+)").expect("display size regex is valid")
});

static WAKEFULNESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mWakefulness=(\w+)").expect("wakefulness regex is valid"));

/// `package/activity` inside a window focus line
static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_.]+)/([A-Za-z0-9_.$]+)").expect("component regex is valid")
});

/// Remote-shell controller configuration
#[derive(Debug, Clone)]
pub struct RemoteShellConfig {
    /// adb executable
    pub adb_program: String,
    pub default_port: u16,
    /// Upper bound for one adb invocation
    pub command_timeout: Duration,
}

impl Default for RemoteShellConfig {
    fn default() -> Self {
        Self {
            adb_program: "adb".to_string(),
            default_port: DEFAULT_PORT,
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// A bridge connection this controller opened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteShellSession {
    /// `address:port`
    pub device_id: String,
    pub address: String,
    pub port: u16,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
}

/// Result of connect, pair and disconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub success: bool,
    pub device_id: String,
    pub message: String,
}

/// Aggregated device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TvInfo {
    pub device_id: String,
    pub model: String,
    pub android_version: String,
    pub battery: String,
    pub resolution: String,
}

/// Foreground application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentApp {
    pub package: String,
    pub activity: String,
}

/// One line of `adb devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeDevice {
    pub serial: String,
    /// `device`, `offline`, `unauthorized`, ...
    pub state: String,
}

impl BridgeDevice {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }

    /// `(host, port)` for devices attached over the network
    pub fn network_endpoint(&self) -> Option<(String, u16)> {
        let (host, port) = self.serial.rsplit_once(':')?;
        Some((host.to_string(), port.parse().ok()?))
    }
}

/// How a dispatch-table entry is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShellAction {
    KeyEvent(u16),
    LaunchApp,
    OpenUrl,
    Text,
}

const KEY_ACTIONS: &[(&str, u16)] = &[
    ("power-on", 224),
    ("power-off", 223),
    ("power", 26),
    ("volume-up", 24),
    ("volume-down", 25),
    ("mute", 164),
    ("up", 19),
    ("down", 20),
    ("left", 21),
    ("right", 22),
    ("select", 23),
    ("back", 4),
    ("home", 3),
    ("menu", 82),
    ("play-pause", 85),
    ("play", 126),
    ("pause", 127),
    ("stop", 86),
    ("next", 87),
    ("previous", 88),
    ("rewind", 89),
    ("fast-forward", 90),
];

/// Named apps accepted by `launch-app` in place of a package
const NAMED_APPS: &[(&str, &str)] = &[
    ("netflix", "com.netflix.ninja"),
    ("youtube", "com.google.android.youtube.tv"),
    ("prime", "com.amazon.amazonvideo.livingroom"),
    ("disney", "com.disney.disneyplus"),
    ("hulu", "com.hulu.livingroomplus"),
    ("spotify", "com.spotify.tv.android"),
    ("plex", "com.plexapp.android"),
    ("kodi", "org.xbmc.kodi"),
];

fn lookup_action(action: &str) -> Option<ShellAction> {
    if let Some((_, code)) = KEY_ACTIONS.iter().find(|(name, _)| *name == action) {
        return Some(ShellAction::KeyEvent(*code));
    }
    match action {
        "launch-app" => Some(ShellAction::LaunchApp),
        "open-url" => Some(ShellAction::OpenUrl),
        "text" => Some(ShellAction::Text),
        _ => None,
    }
}

/// Every action name the dispatch table knows
pub fn action_names() -> Vec<&'static str> {
    KEY_ACTIONS
        .iter()
        .map(|(name, _)| *name)
        .chain(["launch-app", "open-url", "text"])
        .collect()
}

/// Package for a named app, if it is one
pub fn named_app_package(name: &str) -> Option<&'static str> {
    let name = name.trim().to_ascii_lowercase();
    NAMED_APPS
        .iter()
        .find(|(app, _)| *app == name)
        .map(|(_, package)| *package)
}

/// Quote `arg` for the device shell. adb joins everything after `shell`
/// into one command line, so caller-supplied values must be quoted.
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// `input text` takes `%s` for a space
fn input_text_arg(text: &str) -> String {
    shell_quote(&text.replace(' ', "%s"))
}

/// Shell command (after `adb -s SERIAL shell`) for `action`
fn shell_command(action: &str, params: &HashMap<String, String>) -> Result<Vec<String>> {
    let kind = lookup_action(action).ok_or_else(|| ControlError::UnknownAction(action.to_string()))?;
    let param = |key: &'static str| {
        params
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or(ControlError::MissingParameter {
                action: action.to_string(),
                param: key,
            })
    };

    let command = match kind {
        ShellAction::KeyEvent(code) => vec!["input".into(), "keyevent".into(), code.to_string()],
        ShellAction::LaunchApp => {
            let package = match params.get("app").and_then(|app| named_app_package(app)) {
                Some(package) => package.to_string(),
                None => shell_quote(param("package")?),
            };
            vec![
                "monkey".into(),
                "-p".into(),
                package,
                "-c".into(),
                "android.intent.category.LAUNCHER".into(),
                "1".into(),
            ]
        }
        ShellAction::OpenUrl => vec![
            "am".into(),
            "start".into(),
            "-a".into(),
            "android.intent.action.VIEW".into(),
            "-d".into(),
            shell_quote(param("url")?),
        ],
        ShellAction::Text => vec!["input".into(), "text".into(), input_text_arg(param("text")?)],
    };
    Ok(command)
}

pub struct RemoteShellDeviceController {
    config: RemoteShellConfig,
    runner: SharedRunner,
    connect_classifier: Box<dyn OutcomeClassifier>,
    pair_classifier: Box<dyn OutcomeClassifier>,
    shell_classifier: Box<dyn OutcomeClassifier>,
    sessions: RwLock<HashMap<String, RemoteShellSession>>,
}

impl RemoteShellDeviceController {
    pub fn new(config: RemoteShellConfig, runner: SharedRunner) -> Self {
        Self {
            config,
            runner,
            connect_classifier: Box::new(PatternClassifier::adb_connect()),
            pair_classifier: Box::new(PatternClassifier::adb_pair()),
            shell_classifier: Box::new(PatternClassifier::adb_shell()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the rule set used to read `adb connect` output
    pub fn with_connect_classifier(mut self, classifier: Box<dyn OutcomeClassifier>) -> Self {
        self.connect_classifier = classifier;
        self
    }

    pub fn default_port(&self) -> u16 {
        self.config.default_port
    }

    pub fn is_available(&self) -> bool {
        self.runner.is_available(&self.config.adb_program)
    }

    async fn adb(&self, args: &[&str]) -> hearth_shell::Result<CommandOutput> {
        self.runner
            .run(&self.config.adb_program, args, self.config.command_timeout)
            .await
    }

    /// Stdout of `adb -s SERIAL shell ARGS`, `None` on any failure
    async fn shell_query(&self, device_id: &str, args: &[&str]) -> Option<String> {
        let mut full = vec!["-s", device_id, "shell"];
        full.extend_from_slice(args);
        match self.adb(&full).await {
            Ok(output) if self.shell_classifier.classify(&output).is_success() => Some(output.stdout),
            Ok(output) => {
                debug!(device_id = device_id, query = ?args, stderr = %output.stderr.trim(), "Shell query failed");
                None
            }
            Err(e) => {
                debug!(device_id = device_id, query = ?args, error = %e, "Shell query failed");
                None
            }
        }
    }

    /// Connect to `address:port`; success is read from the tool's output,
    /// not its exit status
    pub async fn connect_to_tv(&self, address: &str, port: u16) -> SessionResult {
        let device_id = format!("{}:{}", address, port);
        info!(device_id = %device_id, "Connecting to Android TV");

        let output = match self.adb(&["connect", &device_id]).await {
            Ok(output) => output,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "adb connect failed");
                return SessionResult {
                    success: false,
                    device_id,
                    message: e.to_string(),
                };
            }
        };

        let message = output.stdout.trim().to_string();
        match self.connect_classifier.classify(&output) {
            Outcome::Success | Outcome::AlreadyDone => {
                let session = RemoteShellSession {
                    device_id: device_id.clone(),
                    address: address.to_string(),
                    port,
                    status: ConnectionStatus::Connected,
                    connected_at: Utc::now(),
                };
                self.sessions.write().await.insert(device_id.clone(), session);
                info!(device_id = %device_id, "Connected to Android TV");
                SessionResult {
                    success: true,
                    message: if message.is_empty() {
                        format!("connected to {}", device_id)
                    } else {
                        message
                    },
                    device_id,
                }
            }
            Outcome::Failed(text) => {
                warn!(device_id = %device_id, output = %text, "Android TV refused connection");
                SessionResult {
                    success: false,
                    device_id,
                    message: text,
                }
            }
        }
    }

    /// Pair with a device showing a pairing code; `target` is the
    /// `address:port` of its pairing service
    pub async fn pair(&self, target: &str, code: &str) -> SessionResult {
        info!(target = target, "Pairing with Android TV");
        let result = match self.adb(&["pair", target, code]).await {
            Ok(output) => match self.pair_classifier.classify(&output) {
                Outcome::Success | Outcome::AlreadyDone => Ok(output.stdout.trim().to_string()),
                Outcome::Failed(text) => Err(text),
            },
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(message) => SessionResult {
                success: true,
                device_id: target.to_string(),
                message,
            },
            Err(message) => {
                warn!(target = target, error = %message, "Pairing failed");
                SessionResult {
                    success: false,
                    device_id: target.to_string(),
                    message,
                }
            }
        }
    }

    /// Drop the session and disconnect, whether or not a session existed
    pub async fn disconnect_from_tv(&self, device_id: &str) -> SessionResult {
        if self.sessions.write().await.remove(device_id).is_none() {
            debug!(device_id = device_id, "No session recorded, disconnecting anyway");
        }

        match self.adb(&["disconnect", device_id]).await {
            Ok(output) if output.success() => SessionResult {
                success: true,
                device_id: device_id.to_string(),
                message: format!("Disconnected from {}", device_id),
            },
            Ok(output) => SessionResult {
                success: false,
                device_id: device_id.to_string(),
                message: output.combined().trim().to_string(),
            },
            Err(e) => {
                warn!(device_id = device_id, error = %e, "adb disconnect failed");
                SessionResult {
                    success: false,
                    device_id: device_id.to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    pub async fn sessions(&self) -> Vec<RemoteShellSession> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        sessions
    }

    /// Run `action` on `device_id`. Unknown actions and missing parameters
    /// are rejected locally; tool failures come back as `success: false`.
    pub async fn control_tv(
        &self,
        action: &str,
        device_id: &str,
        params: &HashMap<String, String>,
    ) -> ControlOutcome {
        let id = DeviceId::from(device_id);
        let command = match shell_command(action, params) {
            Ok(command) => command,
            Err(e) => {
                debug!(action = action, error = %e, "Rejected control action");
                return ControlOutcome::failed(action, &id, e.to_string());
            }
        };

        let mut args = vec!["-s", device_id, "shell"];
        args.extend(command.iter().map(String::as_str));
        debug!(device_id = device_id, command = ?command, "Sending control action");

        match self.adb(&args).await {
            Ok(output) => match self.shell_classifier.classify(&output) {
                Outcome::Success | Outcome::AlreadyDone => {
                    ControlOutcome::succeeded(action, &id, format!("{} sent to {}", action, device_id))
                }
                Outcome::Failed(text) => {
                    warn!(device_id = device_id, action = action, output = %text, "Control action failed");
                    ControlOutcome::failed(action, &id, text)
                }
            },
            Err(e) => {
                warn!(device_id = device_id, action = action, error = %e, "Control action failed");
                ControlOutcome::failed(action, &id, e.to_string())
            }
        }
    }

    /// Model, OS version, battery and resolution, queried concurrently.
    /// Each field falls back to its own default.
    pub async fn get_tv_info(&self, device_id: &str) -> TvInfo {
        let (model, version, battery, resolution) = tokio::join!(
            self.shell_query(device_id, &["getprop", "ro.product.model"]),
            self.shell_query(device_id, &["getprop", "ro.build.version.release"]),
            self.shell_query(device_id, &["dumpsys", "battery"]),
            self.shell_query(device_id, &["wm", "size"]),
        );

        TvInfo {
            device_id: device_id.to_string(),
            model: model.as_deref().and_then(parse_prop).unwrap_or_else(|| UNKNOWN.to_string()),
            android_version: version
                .as_deref()
                .and_then(parse_prop)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            battery: battery
                .as_deref()
                .and_then(parse_battery_level)
                .unwrap_or_else(|| BATTERY_UNKNOWN.to_string()),
            resolution: resolution
                .as_deref()
                .and_then(parse_resolution)
                .unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }

    /// Whether the display is awake; `false` when it cannot be determined
    pub async fn is_tv_on(&self, device_id: &str) -> bool {
        self.shell_query(device_id, &["dumpsys", "power"])
            .await
            .map(|out| parse_screen_on(&out))
            .unwrap_or(false)
    }

    pub async fn get_current_app(&self, device_id: &str) -> CurrentApp {
        self.shell_query(device_id, &["dumpsys", "window"])
            .await
            .and_then(|out| parse_focused_app(&out))
            .unwrap_or_else(|| CurrentApp {
                package: UNKNOWN.to_string(),
                activity: UNKNOWN.to_string(),
            })
    }

    /// Devices the bridge currently knows; empty when adb cannot run
    pub async fn list_devices(&self) -> Vec<BridgeDevice> {
        match self.adb(&["devices"]).await {
            Ok(output) if output.success() => parse_device_list(&output.stdout),
            Ok(output) => {
                warn!(stderr = %output.stderr.trim(), "adb devices failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "adb devices failed");
                Vec::new()
            }
        }
    }
}

fn parse_prop(output: &str) -> Option<String> {
    let value = output.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_battery_level(output: &str) -> Option<String> {
    let level = BATTERY_LEVEL.captures(output)?.get(1)?.as_str();
    Some(format!("{}%", level))
}

fn parse_resolution(output: &str) -> Option<String> {
    // "Override size" wins when present; it is what the UI renders at
    let mut physical = None;
    for caps in DISPLAY_SIZE.captures_iter(output) {
        let size = caps.get(2)?.as_str().to_string();
        if &caps[1] == "Override" {
            return Some(size);
        }
        physical = Some(size);
    }
    physical
}

fn parse_screen_on(output: &str) -> bool {
    if output.contains("Display Power: state=ON") {
        return true;
    }
    WAKEFULNESS
        .captures(output)
        .map(|caps| &caps[1] == "Awake")
        .unwrap_or(false)
}

fn parse_focused_app(output: &str) -> Option<CurrentApp> {
    ["mCurrentFocus", "mFocusedApp"].iter().find_map(|marker| {
        let line = output.lines().find(|l| l.contains(marker))?;
        let caps = COMPONENT.captures(line)?;
        Some(CurrentApp {
            package: caps[1].to_string(),
            activity: caps[2].to_string(),
        })
    })
}

/// Parse `adb devices` output, skipping the header
pub fn parse_device_list(output: &str) -> Vec<BridgeDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(BridgeDevice {
                serial: parts.next()?.to_string(),
                state: parts.next()?.to_string(),
            })
        })
        .collect()
}
