use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Up,
    Down,
}

/// Service metadata observed on one open port. Missing values are stored as
/// empty strings so delta comparison never conflates "missing" with
/// "unchanged".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceInfo {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub version: String,
}

/// Structured scan data for one host address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub state: HostState,
    /// Open ports, kept sorted.
    pub open_ports: Vec<u16>,
    /// Per-port service metadata.
    #[serde(default)]
    pub port_details: BTreeMap<u16, ServiceInfo>,
}

impl HostRecord {
    /// Normalize inbound data: sort and dedup ports.
    pub fn normalize(&mut self) {
        self.open_ports.sort_unstable();
        self.open_ports.dedup();
    }

    pub fn is_up(&self) -> bool {
        self.state == HostState::Up
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Full,
    Partial,
}

impl Completeness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

impl std::fmt::Display for Completeness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated outcome of one scan execution. Built additively as tasks
/// complete, then frozen; only frozen results feed delta comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub result_id: String,
    pub scan_id: String,
    pub execution_id: String,
    pub completeness: Completeness,
    pub hosts: BTreeMap<IpAddr, HostRecord>,
    /// Tasks that contributed host data.
    pub task_ids: Vec<String>,
    /// Targets no eligible client could cover.
    pub unassigned: Vec<IpAddr>,
    pub created_at: DateTime<Utc>,
    pub frozen_at: Option<DateTime<Utc>>,
}

/// Headline statistics for one result, rendered by the reporting layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total_hosts: usize,
    pub active_hosts: usize,
    pub total_open_ports: usize,
    pub unique_services: usize,
}

impl ScanResult {
    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn summary(&self) -> ResultSummary {
        let active_hosts = self.hosts.values().filter(|h| h.is_up()).count();
        let total_open_ports = self.hosts.values().map(|h| h.open_ports.len()).sum();
        let unique_services: BTreeSet<&str> = self
            .hosts
            .values()
            .flat_map(|h| h.port_details.values())
            .filter(|s| !s.service.is_empty())
            .map(|s| s.service.as_str())
            .collect();

        ResultSummary {
            total_hosts: self.hosts.len(),
            active_hosts,
            total_open_ports,
            unique_services: unique_services.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(ports: &[u16], service: &str) -> HostRecord {
        let mut details = BTreeMap::new();
        for &p in ports {
            details.insert(
                p,
                ServiceInfo {
                    service: service.to_string(),
                    ..Default::default()
                },
            );
        }
        HostRecord {
            state: HostState::Up,
            open_ports: ports.to_vec(),
            port_details: details,
        }
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let mut record = host(&[443, 22, 443, 80], "x");
        record.normalize();
        assert_eq!(record.open_ports, vec![22, 80, 443]);
    }

    #[test]
    fn test_summary_counts() {
        let mut hosts = BTreeMap::new();
        hosts.insert("10.0.0.1".parse().unwrap(), host(&[22, 80], "ssh"));
        hosts.insert(
            "10.0.0.2".parse().unwrap(),
            HostRecord {
                state: HostState::Down,
                open_ports: vec![],
                port_details: BTreeMap::new(),
            },
        );

        let result = ScanResult {
            result_id: "r-1".into(),
            scan_id: "s-1".into(),
            execution_id: "e-1".into(),
            completeness: Completeness::Full,
            hosts,
            task_ids: vec!["t-1".into()],
            unassigned: vec![],
            created_at: Utc::now(),
            frozen_at: Some(Utc::now()),
        };

        let summary = result.summary();
        assert_eq!(summary.total_hosts, 2);
        assert_eq!(summary.active_hosts, 1);
        assert_eq!(summary.total_open_ports, 2);
        assert_eq!(summary.unique_services, 1);
    }
}
