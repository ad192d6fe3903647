use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::result::ServiceInfo;

/// Port-level changes for one host present in both compared results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPortDelta {
    pub address: IpAddr,
    pub new_ports: Vec<u16>,
    pub closed_ports: Vec<u16>,
}

/// A service identity change on a port open in both compared results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceChange {
    pub address: IpAddr,
    pub port: u16,
    pub baseline: ServiceInfo,
    pub current: ServiceInfo,
}

/// Structured diff between two frozen results of the same scan definition.
///
/// The payload is fully deterministic: entries are sorted by address then
/// port, and the report carries no timestamp or random identifier. The
/// persistence layer stamps a report id and creation time when storing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub scan_id: String,
    pub baseline_result_id: String,
    pub current_result_id: String,
    /// Addresses up in current but absent or down in baseline.
    pub new_hosts: Vec<IpAddr>,
    /// Addresses up in baseline but absent or down in current.
    pub removed_hosts: Vec<IpAddr>,
    pub port_deltas: Vec<HostPortDelta>,
    pub service_changes: Vec<ServiceChange>,
    pub has_changes: bool,
}

impl DeltaReport {
    pub fn new_ports_count(&self) -> usize {
        self.port_deltas.iter().map(|d| d.new_ports.len()).sum()
    }

    pub fn closed_ports_count(&self) -> usize {
        self.port_deltas.iter().map(|d| d.closed_ports.len()).sum()
    }

    pub fn changed_services_count(&self) -> usize {
        self.service_changes.len()
    }
}
