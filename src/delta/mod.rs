use std::collections::BTreeSet;

use tracing::debug;

use crate::errors::FleetError;
use crate::models::{DeltaReport, HostPortDelta, ScanResult, ServiceChange, ServiceInfo};

/// Compare two frozen results of the same scan definition, baseline first.
///
/// Pure and deterministic: entries come out sorted by address then port, so
/// re-running the comparison on the same inputs yields a byte-identical
/// report. The only hard failure in the core is input mismatch; everything
/// else this module sees is valid data.
pub fn compute_delta(
    baseline: &ScanResult,
    current: &ScanResult,
) -> Result<DeltaReport, FleetError> {
    if baseline.scan_id != current.scan_id {
        return Err(FleetError::DeltaInputMismatch(format!(
            "results belong to different scans: {} vs {}",
            baseline.scan_id, current.scan_id
        )));
    }
    if current.created_at <= baseline.created_at {
        return Err(FleetError::DeltaInputMismatch(format!(
            "current result {} does not postdate baseline {}",
            current.result_id, baseline.result_id
        )));
    }
    if !baseline.is_frozen() || !current.is_frozen() {
        return Err(FleetError::DeltaInputMismatch(
            "both results must be frozen".to_string(),
        ));
    }

    let mut new_hosts = Vec::new();
    let mut removed_hosts = Vec::new();
    let mut port_deltas = Vec::new();
    let mut service_changes = Vec::new();

    // Hosts iterate in address order; BTreeMap keeps the output stable.
    for (addr, record) in &current.hosts {
        let was_up = baseline.hosts.get(addr).map(|h| h.is_up()).unwrap_or(false);
        if record.is_up() && !was_up {
            new_hosts.push(*addr);
        }
    }
    for (addr, record) in &baseline.hosts {
        let is_up = current.hosts.get(addr).map(|h| h.is_up()).unwrap_or(false);
        if record.is_up() && !is_up {
            removed_hosts.push(*addr);
        }
    }

    for (addr, current_host) in &current.hosts {
        let Some(baseline_host) = baseline.hosts.get(addr) else {
            continue;
        };

        let baseline_ports: BTreeSet<u16> = baseline_host.open_ports.iter().copied().collect();
        let current_ports: BTreeSet<u16> = current_host.open_ports.iter().copied().collect();

        let new_ports: Vec<u16> = current_ports.difference(&baseline_ports).copied().collect();
        let closed_ports: Vec<u16> = baseline_ports.difference(&current_ports).copied().collect();
        if !new_ports.is_empty() || !closed_ports.is_empty() {
            port_deltas.push(HostPortDelta {
                address: *addr,
                new_ports,
                closed_ports,
            });
        }

        for port in baseline_ports.intersection(&current_ports) {
            let before = service_of(baseline_host, *port);
            let after = service_of(current_host, *port);
            if before != after {
                service_changes.push(ServiceChange {
                    address: *addr,
                    port: *port,
                    baseline: before,
                    current: after,
                });
            }
        }
    }

    let has_changes = !new_hosts.is_empty()
        || !removed_hosts.is_empty()
        || !port_deltas.is_empty()
        || !service_changes.is_empty();

    debug!(
        baseline = %baseline.result_id,
        current = %current.result_id,
        new_hosts = new_hosts.len(),
        removed_hosts = removed_hosts.len(),
        has_changes,
        "Computed delta"
    );

    Ok(DeltaReport {
        scan_id: current.scan_id.clone(),
        baseline_result_id: baseline.result_id.clone(),
        current_result_id: current.result_id.clone(),
        new_hosts,
        removed_hosts,
        port_deltas,
        service_changes,
        has_changes,
    })
}

/// Service identity on a port; a missing entry compares as empty strings,
/// never as "unchanged".
fn service_of(host: &crate::models::HostRecord, port: u16) -> ServiceInfo {
    host.port_details.get(&port).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Completeness, HostRecord, HostState};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use std::net::IpAddr;

    fn host(state: HostState, ports: &[u16]) -> HostRecord {
        HostRecord {
            state,
            open_ports: ports.to_vec(),
            port_details: BTreeMap::new(),
        }
    }

    fn result(
        id: &str,
        scan_id: &str,
        age_minutes: i64,
        hosts: Vec<(&str, HostRecord)>,
    ) -> ScanResult {
        let created_at = Utc::now() - Duration::minutes(age_minutes);
        ScanResult {
            result_id: id.to_string(),
            scan_id: scan_id.to_string(),
            execution_id: format!("exec-{}", id),
            completeness: Completeness::Full,
            hosts: hosts
                .into_iter()
                .map(|(addr, h)| (addr.parse::<IpAddr>().unwrap(), h))
                .collect(),
            task_ids: vec![],
            unassigned: vec![],
            created_at,
            frozen_at: Some(created_at),
        }
    }

    #[test]
    fn test_no_change_baseline() {
        let base = result("r1", "s1", 60, vec![("10.0.0.1", host(HostState::Up, &[22, 80]))]);
        let cur = result("r2", "s1", 0, vec![("10.0.0.1", host(HostState::Up, &[22, 80]))]);

        let report = compute_delta(&base, &cur).unwrap();
        assert!(!report.has_changes);
        assert!(report.new_hosts.is_empty());
        assert!(report.removed_hosts.is_empty());
        assert!(report.port_deltas.is_empty());
        assert!(report.service_changes.is_empty());
    }

    #[test]
    fn test_port_delta() {
        let base = result("r1", "s1", 60, vec![("10.0.0.1", host(HostState::Up, &[22, 80]))]);
        let cur = result("r2", "s1", 0, vec![("10.0.0.1", host(HostState::Up, &[22, 443]))]);

        let report = compute_delta(&base, &cur).unwrap();
        assert!(report.has_changes);
        assert_eq!(report.port_deltas.len(), 1);
        assert_eq!(report.port_deltas[0].new_ports, vec![443]);
        assert_eq!(report.port_deltas[0].closed_ports, vec![80]);
        assert!(report.service_changes.is_empty());
    }

    #[test]
    fn test_new_and_removed_hosts() {
        let base = result(
            "r1",
            "s1",
            60,
            vec![
                ("10.0.0.1", host(HostState::Up, &[22])),
                ("10.0.0.2", host(HostState::Up, &[22])),
            ],
        );
        let cur = result(
            "r2",
            "s1",
            0,
            vec![
                ("10.0.0.2", host(HostState::Down, &[])),
                ("10.0.0.3", host(HostState::Up, &[80])),
            ],
        );

        let report = compute_delta(&base, &cur).unwrap();
        assert_eq!(report.new_hosts, vec!["10.0.0.3".parse::<IpAddr>().unwrap()]);
        // .1 vanished entirely, .2 went down; both count as removed.
        assert_eq!(
            report.removed_hosts,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.2".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_host_down_in_baseline_up_in_current_is_new() {
        let base = result("r1", "s1", 60, vec![("10.0.0.1", host(HostState::Down, &[]))]);
        let cur = result("r2", "s1", 0, vec![("10.0.0.1", host(HostState::Up, &[22]))]);

        let report = compute_delta(&base, &cur).unwrap();
        assert_eq!(report.new_hosts.len(), 1);
        assert!(report.removed_hosts.is_empty());
    }

    #[test]
    fn test_service_change_detection() {
        let mut base_host = host(HostState::Up, &[22, 80]);
        base_host.port_details.insert(
            80,
            ServiceInfo {
                service: "http".into(),
                product: "nginx".into(),
                version: "1.24.0".into(),
            },
        );
        let mut cur_host = host(HostState::Up, &[22, 80]);
        cur_host.port_details.insert(
            80,
            ServiceInfo {
                service: "http".into(),
                product: "nginx".into(),
                version: "1.25.1".into(),
            },
        );

        let base = result("r1", "s1", 60, vec![("10.0.0.1", base_host)]);
        let cur = result("r2", "s1", 0, vec![("10.0.0.1", cur_host)]);

        let report = compute_delta(&base, &cur).unwrap();
        assert_eq!(report.service_changes.len(), 1);
        assert_eq!(report.service_changes[0].port, 80);
        assert_eq!(report.service_changes[0].baseline.version, "1.24.0");
        assert_eq!(report.service_changes[0].current.version, "1.25.1");
        // Port 22 has no metadata on either side: empty == empty, unchanged.
        assert!(report.has_changes);
    }

    #[test]
    fn test_missing_service_compares_as_empty() {
        let mut base_host = host(HostState::Up, &[80]);
        base_host.port_details.insert(
            80,
            ServiceInfo {
                service: "http".into(),
                ..Default::default()
            },
        );
        let cur_host = host(HostState::Up, &[80]);

        let base = result("r1", "s1", 60, vec![("10.0.0.1", base_host)]);
        let cur = result("r2", "s1", 0, vec![("10.0.0.1", cur_host)]);

        let report = compute_delta(&base, &cur).unwrap();
        // "http" -> "" is a change, not an "unchanged because missing".
        assert_eq!(report.service_changes.len(), 1);
        assert_eq!(report.service_changes[0].current, ServiceInfo::default());
    }

    #[test]
    fn test_idempotent_byte_identical() {
        let base = result(
            "r1",
            "s1",
            60,
            vec![
                ("10.0.0.1", host(HostState::Up, &[22, 80])),
                ("10.0.0.5", host(HostState::Up, &[8080])),
            ],
        );
        let cur = result(
            "r2",
            "s1",
            0,
            vec![
                ("10.0.0.1", host(HostState::Up, &[22, 443])),
                ("10.0.0.9", host(HostState::Up, &[22])),
            ],
        );

        let first = compute_delta(&base, &cur).unwrap();
        let second = compute_delta(&base, &cur).unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_output_sorted_by_address() {
        let base = result(
            "r1",
            "s1",
            60,
            vec![
                ("10.0.0.9", host(HostState::Up, &[80])),
                ("10.0.0.1", host(HostState::Up, &[80])),
            ],
        );
        let cur = result(
            "r2",
            "s1",
            0,
            vec![
                ("10.0.0.9", host(HostState::Up, &[443])),
                ("10.0.0.1", host(HostState::Up, &[443])),
            ],
        );

        let report = compute_delta(&base, &cur).unwrap();
        assert_eq!(report.port_deltas.len(), 2);
        assert!(report.port_deltas[0].address < report.port_deltas[1].address);
    }

    #[test]
    fn test_mismatched_scan_rejected() {
        let base = result("r1", "s1", 60, vec![]);
        let cur = result("r2", "other-scan", 0, vec![]);
        assert!(matches!(
            compute_delta(&base, &cur),
            Err(FleetError::DeltaInputMismatch(_))
        ));
    }

    #[test]
    fn test_out_of_order_timestamps_rejected() {
        let base = result("r1", "s1", 0, vec![]);
        let cur = result("r2", "s1", 60, vec![]);
        assert!(matches!(
            compute_delta(&base, &cur),
            Err(FleetError::DeltaInputMismatch(_))
        ));
    }

    #[test]
    fn test_unfrozen_input_rejected() {
        let base = result("r1", "s1", 60, vec![]);
        let mut cur = result("r2", "s1", 0, vec![]);
        cur.frozen_at = None;
        assert!(matches!(
            compute_delta(&base, &cur),
            Err(FleetError::DeltaInputMismatch(_))
        ));
    }
}
