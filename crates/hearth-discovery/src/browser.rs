//! Service-discovery browsing behind a narrow trait

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::error::{DiscoveryError, Result};

/// A resolved service instance with its descriptive records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub fullname: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// TXT key/value records
    pub properties: HashMap<String, String>,
}

/// Browses for one service type at a time
pub trait ServiceBrowser: Send + Sync {
    /// Start browsing; resolved instances arrive on the returned channel
    fn browse(&self, service_type: &str) -> Result<mpsc::UnboundedReceiver<ResolvedService>>;

    /// Stop browsing `service_type`
    fn stop_browse(&self, service_type: &str);
}

/// mDNS browser backed by `mdns-sd`
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl MdnsBrowser {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::MdnsInit(e.to_string()))?;
        Ok(Self { daemon })
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn browse(&self, service_type: &str) -> Result<mpsc::UnboundedReceiver<ResolvedService>> {
        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::Browse {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let service_type = service_type.to_string();

        tokio::spawn(async move {
            loop {
                match receiver.recv_async().await {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        trace!(service = info.get_fullname(), "Service resolved");
                        if tx.send(convert_service_info(&info)).is_err() {
                            break;
                        }
                    }
                    Ok(ServiceEvent::SearchStopped(typ)) => {
                        debug!(typ = typ, "Search stopped");
                        break;
                    }
                    Ok(other) => trace!(event = ?other, "Ignoring mDNS event"),
                    Err(e) => {
                        error!(error = %e, "Error receiving mDNS event");
                        break;
                    }
                }
            }
            debug!("Browser task for {} stopped", service_type);
        });

        Ok(rx)
    }

    fn stop_browse(&self, service_type: &str) {
        if let Err(e) = self.daemon.stop_browse(service_type) {
            warn!(service_type = service_type, error = %e, "Failed to stop mDNS browse");
        }
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        let _ = self.daemon.shutdown();
    }
}

fn convert_service_info(info: &ServiceInfo) -> ResolvedService {
    let properties = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    ResolvedService {
        fullname: info.get_fullname().to_string(),
        hostname: info.get_hostname().to_string(),
        addresses: info.get_addresses().iter().copied().collect(),
        port: info.get_port(),
        properties,
    }
}
