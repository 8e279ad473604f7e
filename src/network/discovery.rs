//! mDNS advertisement and browsing of active sessions.

use anyhow::Result;
use log::{debug, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

const SERVICE_TYPE: &str = "_zipline._tcp.local.";

/// One advertised session as seen on the local network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub instance: String,
    /// "send" or "host".
    pub mode: String,
    pub token: String,
    /// URL path of the session endpoint, e.g. `/d/<token>`.
    pub path: String,
    pub address: IpAddr,
    pub port: u16,
}

impl ServiceRecord {
    /// The full URL a peer should open.
    pub fn url(&self) -> String {
        match self.address {
            IpAddr::V6(v6) => format!("http://[{}]:{}{}", v6, self.port, self.path),
            IpAddr::V4(v4) => format!("http://{}:{}{}", v4, self.port, self.path),
        }
    }

    /// Attempt to parse a record from a resolved mDNS service.
    fn from_service_info(info: &ServiceInfo) -> Option<Self> {
        let address = info.get_addresses().iter().next().copied()?;

        // Extract TXT records
        let mut txt = HashMap::new();
        for prop in info.get_properties().iter() {
            if let Some(val) = prop.val() {
                if let Ok(value) = String::from_utf8(val.to_vec()) {
                    txt.insert(prop.key().to_string(), value);
                }
            }
        }

        let instance = info.get_fullname().split('.').next()?.to_string();
        Some(Self {
            instance,
            mode: txt.get("mode")?.clone(),
            token: txt.get("token")?.clone(),
            path: txt.get("path")?.clone(),
            address,
            port: info.get_port(),
        })
    }
}

/// Handle for an active advertisement; retracts the record on shutdown.
pub struct Advertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Advertiser {
    /// Retract the advertised record.
    pub fn shutdown(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("failed to unregister mDNS service: {}", e);
        }
    }
}

/// Publish a session record on the local network.
pub fn advertise(record: &ServiceRecord) -> Result<Advertiser> {
    let daemon = ServiceDaemon::new()?;
    let hostname = format!("{}.local.", record.address);

    let mut properties = HashMap::new();
    properties.insert("mode".to_string(), record.mode.clone());
    properties.insert("token".to_string(), record.token.clone());
    properties.insert("path".to_string(), record.path.clone());

    let service_info = ServiceInfo::new(
        SERVICE_TYPE,
        &record.instance,
        &hostname,
        &record.address.to_string(),
        record.port,
        properties,
    )?;
    let fullname = service_info.get_fullname().to_string();

    daemon.register(service_info)?;
    info!(
        "advertising '{}' on {}:{}",
        record.instance, record.address, record.port
    );

    Ok(Advertiser { daemon, fullname })
}

/// Collect the session records visible on the local network within `timeout`.
pub async fn browse(timeout: Duration) -> Result<Vec<ServiceRecord>> {
    let daemon = ServiceDaemon::new()?;
    let receiver = daemon.browse(SERVICE_TYPE)?;
    let deadline = tokio::time::Instant::now() + timeout;

    let mut found: HashMap<String, ServiceRecord> = HashMap::new();
    loop {
        match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
            // Deadline reached: report what we have.
            Err(_) => break,
            Ok(Err(_)) => break,
            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                if let Some(record) = ServiceRecord::from_service_info(&info) {
                    debug!("resolved {} [{}]", record.instance, record.mode);
                    found.insert(info.get_fullname().to_string(), record);
                }
            }
            Ok(Ok(ServiceEvent::ServiceRemoved(_, fullname))) => {
                found.remove(&fullname);
            }
            Ok(Ok(_)) => {}
        }
    }

    let mut records: Vec<ServiceRecord> = found.into_values().collect();
    records.sort_by(|a, b| a.instance.cmp(&b.instance));
    Ok(records)
}
