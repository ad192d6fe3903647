use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;

use crate::errors::FleetError;

/// Default cap on expanded target-set size (a /16 worth of addresses).
pub const DEFAULT_MAX_TARGETS: usize = 65536;

/// Expand a target specification into a deduplicated, order-independent
/// address set.
///
/// The specification is a comma-separated list; each item is a single
/// address, a CIDR block (`10.0.0.0/24`), or an inclusive IPv4 range
/// (`10.0.0.1-10.0.0.5`). Expansion is capped at `max_targets`.
pub fn expand_targets(spec: &str, max_targets: usize) -> Result<BTreeSet<IpAddr>, FleetError> {
    let mut targets = BTreeSet::new();

    for item in spec.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        if item.contains('/') {
            expand_cidr(item, max_targets, &mut targets)?;
        } else if let Some((start, end)) = item.split_once('-') {
            expand_range(start.trim(), end.trim(), max_targets, &mut targets)?;
        } else {
            let addr: IpAddr = item
                .parse()
                .map_err(|_| FleetError::InvalidTarget(format!("not an address: {}", item)))?;
            insert_capped(addr, max_targets, &mut targets)?;
        }
    }

    if targets.is_empty() {
        return Err(FleetError::InvalidTarget(format!(
            "specification expands to no addresses: {}",
            spec
        )));
    }

    Ok(targets)
}

fn expand_cidr(
    item: &str,
    max_targets: usize,
    targets: &mut BTreeSet<IpAddr>,
) -> Result<(), FleetError> {
    let net: IpNet = item
        .parse()
        .map_err(|_| FleetError::InvalidTarget(format!("not a CIDR block: {}", item)))?;
    for addr in net.hosts() {
        insert_capped(addr, max_targets, targets)?;
    }
    Ok(())
}

fn expand_range(
    start: &str,
    end: &str,
    max_targets: usize,
    targets: &mut BTreeSet<IpAddr>,
) -> Result<(), FleetError> {
    let start: Ipv4Addr = start
        .parse()
        .map_err(|_| FleetError::InvalidTarget(format!("bad range start: {}", start)))?;
    let end: Ipv4Addr = end
        .parse()
        .map_err(|_| FleetError::InvalidTarget(format!("bad range end: {}", end)))?;

    let (lo, hi) = (u32::from(start), u32::from(end));
    if lo > hi {
        return Err(FleetError::InvalidTarget(format!(
            "range start after end: {}-{}",
            start, end
        )));
    }

    for raw in lo..=hi {
        insert_capped(IpAddr::V4(Ipv4Addr::from(raw)), max_targets, targets)?;
    }
    Ok(())
}

fn insert_capped(
    addr: IpAddr,
    max_targets: usize,
    targets: &mut BTreeSet<IpAddr>,
) -> Result<(), FleetError> {
    targets.insert(addr);
    if targets.len() > max_targets {
        return Err(FleetError::InvalidTarget(format!(
            "specification expands past the {} address cap",
            max_targets
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_expand_single_address() {
        let targets = expand_targets("192.168.1.10", DEFAULT_MAX_TARGETS).unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets.contains(&v4("192.168.1.10")));
    }

    #[test]
    fn test_expand_cidr_excludes_network_and_broadcast() {
        let targets = expand_targets("10.0.0.0/30", DEFAULT_MAX_TARGETS).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&v4("10.0.0.1")));
        assert!(targets.contains(&v4("10.0.0.2")));
    }

    #[test]
    fn test_expand_slash_32_yields_the_address() {
        let targets = expand_targets("10.0.0.7/32", DEFAULT_MAX_TARGETS).unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets.contains(&v4("10.0.0.7")));
    }

    #[test]
    fn test_expand_inclusive_range() {
        let targets = expand_targets("10.0.0.1-10.0.0.5", DEFAULT_MAX_TARGETS).unwrap();
        assert_eq!(targets.len(), 5);
        assert!(targets.contains(&v4("10.0.0.1")));
        assert!(targets.contains(&v4("10.0.0.5")));
    }

    #[test]
    fn test_expand_list_dedups_overlap() {
        let targets =
            expand_targets("10.0.0.1, 10.0.0.1-10.0.0.3, 10.0.0.2", DEFAULT_MAX_TARGETS).unwrap();
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn test_expand_rejects_garbage() {
        assert!(expand_targets("not-an-address", DEFAULT_MAX_TARGETS).is_err());
        assert!(expand_targets("10.0.0.5-10.0.0.1", DEFAULT_MAX_TARGETS).is_err());
        assert!(expand_targets("10.0.0.0/99", DEFAULT_MAX_TARGETS).is_err());
        assert!(expand_targets("", DEFAULT_MAX_TARGETS).is_err());
    }

    #[test]
    fn test_expand_enforces_cap() {
        let result = expand_targets("10.0.0.0/24", 10);
        assert!(matches!(result, Err(FleetError::InvalidTarget(_))));
    }

    #[test]
    fn test_expand_accepts_ipv6() {
        let targets = expand_targets("2001:db8::1", DEFAULT_MAX_TARGETS).unwrap();
        assert!(targets.contains(&"2001:db8::1".parse::<IpAddr>().unwrap()));
    }
}
