use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Client;

/// Disjoint assignment of a target set across eligible clients.
///
/// The per-client subsets are pairwise disjoint and their union plus
/// `unassigned` equals the input target set exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    /// client id -> sorted address subset
    pub assignments: BTreeMap<String, Vec<IpAddr>>,
    /// Targets no eligible client covers.
    pub unassigned: Vec<IpAddr>,
}

impl Partition {
    pub fn assigned_count(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }
}

/// Assign each target address to exactly one eligible client.
///
/// Tie-break between overlapping client ranges: most specific declared range
/// first (fewest addresses; unrestricted clients rank last), then lowest
/// current assigned load, then lowest client id. The rule lives in
/// [`pick_owner`] so deployments can swap the policy without touching the
/// coverage guarantee.
pub fn partition_targets(targets: &BTreeSet<IpAddr>, clients: &[Client]) -> Partition {
    let mut assignments: BTreeMap<String, Vec<IpAddr>> = BTreeMap::new();
    let mut unassigned = Vec::new();
    let mut loads: HashMap<&str, usize> = HashMap::new();

    for addr in targets {
        let eligible: Vec<&Client> = clients.iter().filter(|c| c.accepts(addr)).collect();
        match pick_owner(&eligible, &loads) {
            Some(owner) => {
                *loads.entry(owner).or_insert(0) += 1;
                assignments.entry(owner.to_string()).or_default().push(*addr);
            }
            None => unassigned.push(*addr),
        }
    }

    debug!(
        clients = assignments.len(),
        assigned = assignments.values().map(Vec::len).sum::<usize>(),
        unassigned = unassigned.len(),
        "Partitioned targets"
    );

    Partition {
        assignments,
        unassigned,
    }
}

/// Tie-break policy: (range size, current load, client id) ascending.
fn pick_owner<'a>(eligible: &[&'a Client], loads: &HashMap<&str, usize>) -> Option<&'a str> {
    eligible
        .iter()
        .min_by_key(|c| {
            (
                c.range_size(),
                loads.get(c.client_id.as_str()).copied().unwrap_or(0),
                c.client_id.as_str(),
            )
        })
        .map(|c| c.client_id.as_str())
}
