use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scan definition: what to scan and how. Owned by the scheduling/web
/// layer; the coordination core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanDefinition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Target specification: comma-separated addresses, CIDR blocks, or
    /// `a-b` ranges.
    pub targets: String,
    /// Port specification passed through to agents, e.g. `1-1000` or `22,80`.
    pub ports: String,
    pub scan_arguments: String,
    /// Recurrence interval for the external scheduler; `None` = on demand.
    pub interval_minutes: Option<u32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanDefinition {
    pub fn new(id: String, name: String, targets: String, ports: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            description: None,
            targets,
            ports,
            scan_arguments: "-sV".to_string(),
            interval_minutes: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
