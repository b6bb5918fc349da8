//! Chromecast discovery over multicast DNS
//!
//! A scan opens a browse session for a bounded window, accumulates resolved
//! receivers keyed by address (first seen wins), then stops the browser.
//!
//! Only one session is active per scanner. Starting a scan supersedes the
//! running one: each session holds a token, and a session whose token is no
//! longer current stops at once, returns what it collected so far, and
//! leaves the browser to the newer session.

use hearth_core::{DeviceDescriptor, DeviceType};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::browser::{ResolvedService, ServiceBrowser};

pub const GOOGLECAST_SERVICE: &str = "_googlecast._tcp.local.";

const DEFAULT_NAME: &str = "Unknown";
const DEFAULT_MODEL: &str = "Unknown";
const DEFAULT_MANUFACTURER: &str = "Google";

/// Sentinel for "no active session"
const IDLE: u64 = 0;

#[derive(Debug, Clone)]
pub struct MulticastConfig {
    pub service_type: String,
    pub scan_duration: Duration,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            service_type: GOOGLECAST_SERVICE.to_string(),
            scan_duration: Duration::from_secs(5),
        }
    }
}

/// Accumulation state of one browse window
struct ScanSession {
    token: u64,
    seen: HashSet<String>,
    devices: Vec<DeviceDescriptor>,
}

impl ScanSession {
    fn new(token: u64) -> Self {
        Self {
            token,
            seen: HashSet::new(),
            devices: Vec::new(),
        }
    }

    fn record(&mut self, service: &ResolvedService) {
        let Some(device) = descriptor_from_service(service) else {
            debug!(service = %service.fullname, "Resolved service has no address");
            return;
        };
        if self.seen.insert(device.address.clone()) {
            info!(name = %device.name, ip = %device.address, "Found Chromecast");
            self.devices.push(device);
        }
    }
}

pub struct MulticastDeviceScanner {
    config: MulticastConfig,
    browser: Arc<dyn ServiceBrowser>,
    next_token: AtomicU64,
    /// Token of the session that owns the browser, or `IDLE`
    active: watch::Sender<u64>,
}

impl MulticastDeviceScanner {
    pub fn new(config: MulticastConfig, browser: Arc<dyn ServiceBrowser>) -> Self {
        let (active, _) = watch::channel(IDLE);
        Self {
            config,
            browser,
            next_token: AtomicU64::new(IDLE),
            active,
        }
    }

    pub fn default_duration(&self) -> Duration {
        self.config.scan_duration
    }

    pub fn is_scanning(&self) -> bool {
        *self.active.borrow() != IDLE
    }

    fn is_current(&self, token: u64) -> bool {
        *self.active.borrow() == token
    }

    /// Browse for `duration` and return every distinct receiver seen.
    /// Browser errors are logged; the scan then reports what it has.
    pub async fn scan(&self, duration: Duration) -> Vec<DeviceDescriptor> {
        let (token, active_rx) = self.claim();
        self.run_session(token, active_rx, duration).await
    }

    /// Take ownership of the browser with a fresh token. The receiver is
    /// subscribed before the token is published so no later claim is missed.
    fn claim(&self) -> (u64, watch::Receiver<u64>) {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let active_rx = self.active.subscribe();
        let previous = self.active.send_replace(token);
        if previous != IDLE {
            info!(previous = previous, token = token, "Superseding active multicast scan");
        }
        (token, active_rx)
    }

    async fn run_session(
        &self,
        token: u64,
        mut active_rx: watch::Receiver<u64>,
        duration: Duration,
    ) -> Vec<DeviceDescriptor> {
        let service_type = self.config.service_type.as_str();
        let mut session = ScanSession::new(token);

        if !self.is_current(token) {
            debug!(token = token, "Scan session superseded before browsing");
            return session.devices;
        }

        let mut events = match self.browser.browse(service_type) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Multicast browse failed");
                self.finish(&session, false);
                return session.devices;
            }
        };

        debug!(service_type = service_type, duration = ?duration, token = token, "Multicast scan started");

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                changed = active_rx.changed() => {
                    if changed.is_err() || !self.is_current(token) {
                        debug!(token = token, "Scan session superseded");
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(service) => session.record(&service),
                    None => events_open = false,
                },
            }
        }

        self.finish(&session, true);
        info!("Multicast scan found {} devices", session.devices.len());
        session.devices
    }

    /// Close the session if it is still the current one; a stale session
    /// leaves the browser and the active token alone.
    fn finish(&self, session: &ScanSession, browsing: bool) {
        let closed = self.active.send_if_modified(|active| {
            if *active == session.token {
                *active = IDLE;
                true
            } else {
                false
            }
        });

        if !closed {
            debug!(token = session.token, "Discarding stale scan completion");
        } else if browsing {
            self.browser.stop_browse(&self.config.service_type);
        }
    }
}

/// Build a descriptor from a resolved cast receiver
pub fn descriptor_from_service(service: &ResolvedService) -> Option<DeviceDescriptor> {
    let address = preferred_address(&service.addresses)?;
    let property = |key: &str| {
        service
            .properties
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    let name = property("fn").unwrap_or(DEFAULT_NAME);
    let model = property("md").unwrap_or(DEFAULT_MODEL);

    let mut device = DeviceDescriptor::new(name, DeviceType::Chromecast, address.to_string())
        .with_extra("model", model)
        .with_extra("manufacturer", DEFAULT_MANUFACTURER);
    if service.port != 0 {
        device = device.with_port(service.port);
    }
    if let Some(id) = property("id") {
        device = device.with_extra("cast_id", id);
    }
    Some(device)
}

/// Dotted-quad addresses first, then anything else
fn preferred_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cast_service, ScriptedBrowser};
    use tokio::time::Instant;

    fn scanner(browser: Arc<ScriptedBrowser>) -> MulticastDeviceScanner {
        MulticastDeviceScanner::new(MulticastConfig::default(), browser)
    }

    #[test]
    fn test_descriptor_defaults() {
        let mut service = cast_service("10.0.0.7", None, None);
        service.addresses.insert(0, "fe80::1".parse().unwrap());
        let device = descriptor_from_service(&service).unwrap();
        assert_eq!(device.address, "10.0.0.7");
        assert_eq!(device.name, "Unknown");
        assert_eq!(device.extra["manufacturer"], "Google");
        assert_eq!(device.extra["model"], "Unknown");
        assert_eq!(device.device_type, DeviceType::Chromecast);
        assert_eq!(device.port, Some(8009));
    }

    #[test]
    fn test_descriptor_requires_address() {
        let mut service = cast_service("10.0.0.7", Some("TV"), None);
        service.addresses.clear();
        assert!(descriptor_from_service(&service).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_deduplicates_by_address() {
        let browser = Arc::new(ScriptedBrowser::new(vec![
            (Duration::from_millis(100), cast_service("10.0.0.7", Some("Living Room"), Some("Chromecast Ultra"))),
            (Duration::from_millis(200), cast_service("10.0.0.8", Some("Kitchen"), None)),
            (Duration::from_millis(300), cast_service("10.0.0.7", Some("Renamed"), None)),
        ]));
        let scanner = scanner(browser.clone());

        let started = Instant::now();
        let devices = scanner.scan(Duration::from_secs(2)).await;

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Living Room");
        assert_eq!(devices[0].extra["model"], "Chromecast Ultra");
        assert_eq!(devices[1].name, "Kitchen");
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_millis(2100));
        assert_eq!(browser.stop_count(), 1);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_scan_waits_out_window() {
        let browser = Arc::new(ScriptedBrowser::new(Vec::new()));
        let scanner = scanner(browser);

        let started = Instant::now();
        let devices = scanner.scan(Duration::from_millis(1500)).await;
        assert!(devices.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(started.elapsed() < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_browse_failure_is_swallowed() {
        let browser = Arc::new(ScriptedBrowser::failing());
        let scanner = scanner(browser.clone());
        assert!(scanner.scan(Duration::from_secs(1)).await.is_empty());
        assert_eq!(browser.stop_count(), 0);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_scan_supersedes_first() {
        let browser = Arc::new(ScriptedBrowser::new(vec![(
            Duration::from_millis(50),
            cast_service("10.0.0.9", Some("Den"), None),
        )]));
        let scanner = Arc::new(scanner(browser.clone()));

        let first = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.scan(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let second = scanner.scan(Duration::from_secs(1)).await;
        let stale = first.await.unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(stale.len(), 1);
        // The stale session ended early instead of waiting out its 60s window.
        assert!(started.elapsed() < Duration::from_secs(2));
        // Only the current session stopped the browser.
        assert_eq!(browser.stop_count(), 1);
        assert_eq!(browser.browse_count(), 2);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_claimed_over_never_browses() {
        let browser = Arc::new(ScriptedBrowser::new(vec![(
            Duration::from_millis(50),
            cast_service("10.0.0.9", Some("Den"), None),
        )]));
        let scanner = scanner(browser.clone());

        let (older, older_rx) = scanner.claim();
        let (newer, newer_rx) = scanner.claim();
        assert!(newer > older);

        let started = Instant::now();
        assert!(scanner.run_session(older, older_rx, Duration::from_secs(60)).await.is_empty());
        assert!(started.elapsed() < Duration::from_millis(10));
        assert_eq!(browser.browse_count(), 0);
        assert!(scanner.is_scanning());

        let devices = scanner.run_session(newer, newer_rx, Duration::from_secs(1)).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(browser.browse_count(), 1);
        assert_eq!(browser.stop_count(), 1);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_claim_sees_later_claims() {
        let scanner = scanner(Arc::new(ScriptedBrowser::new(Vec::new())));
        let (older, mut older_rx) = scanner.claim();
        let (newer, _newer_rx) = scanner.claim();

        assert!(older_rx.has_changed().unwrap());
        assert_eq!(*older_rx.borrow_and_update(), newer);
        assert!(!scanner.is_current(older));
    }
}
