use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::errors::FleetError;

/// Approval/liveness state of a scanning client.
///
/// `PendingApproval -> Approved <-> Offline`, with `Revoked` terminal and
/// reachable from any non-revoked state. The transition methods on
/// [`Client`] are the only mutation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientState {
    PendingApproval,
    Approved,
    Offline,
    Revoked,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending-approval",
            Self::Approved => "approved",
            Self::Offline => "offline",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending-approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "offline" => Some(Self::Offline),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata a client reports with each heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub client_id: String,
    pub hostname: String,
    /// Address the coordinator dispatches tasks to (`ip:port`).
    pub address: String,
    /// Address range this client is authorized to scan; absent = unrestricted.
    pub scan_range: Option<IpNet>,
    /// Max concurrent tasks the client accepts.
    pub capacity: u32,
}

/// A scanning client device. Soft state only: clients are never hard-deleted
/// so historical task attribution survives revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub hostname: String,
    pub address: String,
    pub scan_range: Option<IpNet>,
    pub state: ClientState,
    pub capacity: u32,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Create a client from its first heartbeat, awaiting operator approval.
    pub fn register(heartbeat: &Heartbeat, now: DateTime<Utc>) -> Self {
        Self {
            client_id: heartbeat.client_id.clone(),
            hostname: heartbeat.hostname.clone(),
            address: heartbeat.address.clone(),
            scan_range: heartbeat.scan_range,
            state: ClientState::PendingApproval,
            capacity: heartbeat.capacity,
            last_seen: now,
            created_at: now,
        }
    }

    /// Absorb a heartbeat: refresh metadata and last-seen, and recover an
    /// offline client back to approved. Revoked clients stay revoked.
    pub fn touch(&mut self, heartbeat: &Heartbeat, now: DateTime<Utc>) {
        self.hostname = heartbeat.hostname.clone();
        self.address = heartbeat.address.clone();
        self.scan_range = heartbeat.scan_range;
        self.capacity = heartbeat.capacity;
        self.last_seen = now;
        if self.state == ClientState::Offline {
            self.state = ClientState::Approved;
        }
    }

    /// Operator approval. Idempotent; rejected for revoked clients.
    pub fn approve(&mut self) -> Result<(), FleetError> {
        match self.state {
            ClientState::PendingApproval | ClientState::Offline => {
                self.state = ClientState::Approved;
                Ok(())
            }
            ClientState::Approved => Ok(()),
            ClientState::Revoked => Err(FleetError::InvalidTransition(format!(
                "client {} is revoked and cannot be approved",
                self.client_id
            ))),
        }
    }

    /// Operator revocation. Idempotent; excludes the client from all future
    /// partitioning even if it keeps sending heartbeats.
    pub fn revoke(&mut self) {
        self.state = ClientState::Revoked;
    }

    /// Liveness sweep transition for approved clients with stale heartbeats.
    pub fn mark_offline(&mut self) -> Result<(), FleetError> {
        match self.state {
            ClientState::Approved => {
                self.state = ClientState::Offline;
                Ok(())
            }
            ClientState::Offline => Ok(()),
            other => Err(FleetError::InvalidTransition(format!(
                "client {} cannot go offline from {}",
                self.client_id, other
            ))),
        }
    }

    /// Whether this client may be assigned the given address.
    pub fn accepts(&self, addr: &std::net::IpAddr) -> bool {
        match &self.scan_range {
            Some(net) => net.contains(addr),
            None => true,
        }
    }

    /// Number of addresses in the declared range; unrestricted clients rank
    /// behind any declared range in the most-specific-first tie-break.
    pub fn range_size(&self) -> u128 {
        match &self.scan_range {
            Some(IpNet::V4(net)) => 1u128 << (32 - net.prefix_len()),
            Some(IpNet::V6(net)) => match 128 - net.prefix_len() {
                128 => u128::MAX,
                bits => 1u128 << bits,
            },
            None => u128::MAX,
        }
    }
}
