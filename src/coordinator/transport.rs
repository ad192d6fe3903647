use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FleetError;
use crate::models::Client;

/// Wire payload for pushing one task to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDispatch {
    pub task_id: String,
    pub scan_id: String,
    pub targets: Vec<IpAddr>,
    pub ports: String,
    pub scan_arguments: String,
    pub deadline: DateTime<Utc>,
}

/// Outbound seam to scanning agents. Dispatch is a synchronous
/// accept-or-reject round-trip; the result arrives later through the
/// inbound submission endpoint. Implementations must map a rejection to
/// [`FleetError::ClientUnapproved`] and transport failures to
/// [`FleetError::ClientUnreachable`].
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn dispatch(&self, client: &Client, task: &TaskDispatch) -> Result<(), FleetError>;

    /// Best-effort cancellation notice for an in-flight task.
    async fn cancel_task(&self, client: &Client, task_id: &str) -> Result<(), FleetError>;
}

/// HTTP transport: POSTs task payloads to the address each agent reports in
/// its heartbeat.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, FleetError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FleetError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn dispatch(&self, client: &Client, task: &TaskDispatch) -> Result<(), FleetError> {
        let url = format!("http://{}/tasks", client.address);
        let response = self
            .http
            .post(&url)
            .json(task)
            .send()
            .await
            .map_err(|e| FleetError::ClientUnreachable(format!("{}: {}", client.client_id, e)))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::FORBIDDEN => Err(FleetError::ClientUnapproved(format!(
                "{} rejected task {}",
                client.client_id, task.task_id
            ))),
            status => Err(FleetError::ClientUnreachable(format!(
                "{} answered dispatch with {}",
                client.client_id, status
            ))),
        }
    }

    async fn cancel_task(&self, client: &Client, task_id: &str) -> Result<(), FleetError> {
        let url = format!("http://{}/tasks/{}/cancel", client.address, task_id);
        self.http
            .post(&url)
            .send()
            .await
            .map_err(|e| FleetError::Network(format!("{}: {}", client.client_id, e)))?;
        Ok(())
    }
}
