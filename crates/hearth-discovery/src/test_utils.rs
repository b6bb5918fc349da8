//! Scripted service browser for tests

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::browser::{ResolvedService, ServiceBrowser};
use crate::error::{DiscoveryError, Result};

/// Replays the same resolved services on every browse, each delay counted
/// from the previous send
pub struct ScriptedBrowser {
    services: Vec<(Duration, ResolvedService)>,
    fail: bool,
    browses: AtomicUsize,
    stops: AtomicUsize,
}

impl ScriptedBrowser {
    pub fn new(services: Vec<(Duration, ResolvedService)>) -> Self {
        Self {
            services,
            fail: false,
            browses: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// A browser whose every browse call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn browse_count(&self) -> usize {
        self.browses.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl ServiceBrowser for ScriptedBrowser {
    fn browse(&self, service_type: &str) -> Result<mpsc::UnboundedReceiver<ResolvedService>> {
        self.browses.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DiscoveryError::Browse {
                service_type: service_type.to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let services = self.services.clone();
        tokio::spawn(async move {
            for (delay, service) in services {
                tokio::time::sleep(delay).await;
                if tx.send(service).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn stop_browse(&self, _service_type: &str) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A resolved `_googlecast._tcp` instance at `ip` with optional `fn`/`md` records
pub fn cast_service(ip: &str, friendly_name: Option<&str>, model: Option<&str>) -> ResolvedService {
    let address: IpAddr = ip.parse().expect("valid test address");
    let mut properties = HashMap::new();
    if let Some(name) = friendly_name {
        properties.insert("fn".to_string(), name.to_string());
    }
    if let Some(model) = model {
        properties.insert("md".to_string(), model.to_string());
    }
    ResolvedService {
        fullname: format!("Chromecast-{}._googlecast._tcp.local.", ip),
        hostname: format!("{}.local.", ip.replace('.', "-")),
        addresses: vec![address],
        port: 8009,
        properties,
    }
}
