use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::Deserialize;

use crate::models::HostRecord;

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub client_id: String,
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
    /// CIDR the client is authorized to scan; omitted = unrestricted.
    pub scan_range: Option<String>,
    pub capacity: Option<u32>,
}

#[derive(Deserialize)]
pub struct CreateScanRequest {
    pub name: String,
    pub description: Option<String>,
    pub targets: String,
    pub ports: Option<String>,
    pub scan_arguments: Option<String>,
    pub interval_minutes: Option<u32>,
}

#[derive(Deserialize)]
pub struct TaskResultRequest {
    /// `completed` or `failed`.
    pub status: String,
    pub error: Option<String>,
    #[serde(default)]
    pub hosts: BTreeMap<IpAddr, HostRecord>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub only_changes: Option<bool>,
}
