use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FleetConfig {
    pub server: Option<ServerConfig>,
    pub heartbeat: Option<HeartbeatConfig>,
    pub dispatch: Option<DispatchConfig>,
    pub partition: Option<PartitionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HeartbeatConfig {
    /// Interval agents are expected to report at, in seconds.
    pub interval_secs: Option<u64>,
    /// Liveness timeout as a multiple of the heartbeat interval.
    pub timeout_multiplier: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DispatchConfig {
    pub request_timeout_secs: Option<u64>,
    pub base_timeout_secs: Option<u64>,
    pub per_target_timeout_secs: Option<u64>,
    pub global_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PartitionConfig {
    pub max_targets: Option<usize>,
}

impl FleetConfig {
    pub fn host(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.host.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().and_then(|s| s.port).unwrap_or(8080)
    }

    pub fn db_path(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.db_path.clone())
            .unwrap_or_else(|| "./data/fleetscan.db".to_string())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        let secs = self
            .heartbeat
            .as_ref()
            .and_then(|h| h.interval_secs)
            .unwrap_or(60);
        Duration::from_secs(secs)
    }

    /// Liveness timeout: heartbeat interval times the configured multiplier
    /// (default 3, per the deployed sweep policy).
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        let interval = self.heartbeat_interval().as_secs() as i64;
        let multiplier = self
            .heartbeat
            .as_ref()
            .and_then(|h| h.timeout_multiplier)
            .unwrap_or(3) as i64;
        chrono::Duration::seconds(interval * multiplier)
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        let d = self.dispatch.clone().unwrap_or_default();
        DispatchPolicy {
            request_timeout: Duration::from_secs(d.request_timeout_secs.unwrap_or(10)),
            base_timeout: Duration::from_secs(d.base_timeout_secs.unwrap_or(30)),
            per_target_timeout: Duration::from_secs(d.per_target_timeout_secs.unwrap_or(15)),
            global_timeout: Duration::from_secs(d.global_timeout_secs.unwrap_or(3600)),
            max_targets: self
                .partition
                .as_ref()
                .and_then(|p| p.max_targets)
                .unwrap_or(65536),
        }
    }
}

/// Resolved timing knobs for task dispatch and supervision.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Timeout for the synchronous dispatch round-trip to an agent.
    pub request_timeout: Duration,
    /// Fixed component of a task deadline.
    pub base_timeout: Duration,
    /// Per-assigned-address component of a task deadline.
    pub per_target_timeout: Duration,
    /// Execution-level timeout after which a stuck execution freezes as partial.
    pub global_timeout: Duration,
    /// Cap on expanded target-set size.
    pub max_targets: usize,
}

impl DispatchPolicy {
    /// Deadline for a task scanning `target_count` addresses.
    pub fn task_deadline(&self, target_count: usize) -> Duration {
        self.base_timeout + self.per_target_timeout * target_count as u32
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        FleetConfig::default().dispatch_policy()
    }
}
