pub mod transport;

pub use transport::{AgentTransport, HttpTransport, TaskDispatch};

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::ResultAggregator;
use crate::config::DispatchPolicy;
use crate::db::Database;
use crate::delta::compute_delta;
use crate::errors::FleetError;
use crate::models::{Client, Completeness, HostRecord, ScanDefinition, ScanResult, ScanTask};
use crate::partition::partition_targets;
use crate::registry::ClientRegistry;
use crate::targets::expand_targets;

/// Response payload for a started execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStarted {
    pub execution_id: String,
    pub result_id: String,
    pub task_count: usize,
    pub assigned_targets: usize,
    pub unassigned_targets: usize,
}

/// Dispatches per-agent task chunks, supervises their deadlines, and wires
/// frozen results into delta generation.
///
/// Cheap to clone: all state is shared behind `Arc`s, so supervision futures
/// carry their own handle.
#[derive(Clone)]
pub struct ScanCoordinator {
    registry: Arc<ClientRegistry>,
    aggregator: Arc<ResultAggregator>,
    transport: Arc<dyn AgentTransport>,
    db: Database,
    policy: DispatchPolicy,
    active: Arc<DashMap<String, CancellationToken>>,
}

impl ScanCoordinator {
    pub fn new(
        registry: Arc<ClientRegistry>,
        aggregator: Arc<ResultAggregator>,
        transport: Arc<dyn AgentTransport>,
        db: Database,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            registry,
            aggregator,
            transport,
            db,
            policy,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Start one execution of a scan definition: expand targets, partition
    /// them over the current eligible-client snapshot, persist the task set,
    /// and fan out dispatch. Returns as soon as supervision is spawned.
    pub async fn execute(&self, definition: &ScanDefinition) -> Result<ExecutionStarted, FleetError> {
        let targets = expand_targets(&definition.targets, self.policy.max_targets)?;
        let clients = self.registry.eligible_clients().await;
        let partition = partition_targets(&targets, &clients);

        let now = Utc::now();
        let execution_id = Uuid::new_v4().to_string();
        let result_id = Uuid::new_v4().to_string();

        if !partition.unassigned.is_empty() {
            warn!(
                scan_id = %definition.id,
                execution_id = %execution_id,
                unassigned = partition.unassigned.len(),
                "Partial coverage: targets without an eligible client"
            );
        }

        self.db.create_result(&ScanResult {
            result_id: result_id.clone(),
            scan_id: definition.id.clone(),
            execution_id: execution_id.clone(),
            completeness: Completeness::Partial,
            hosts: BTreeMap::new(),
            task_ids: vec![],
            unassigned: partition.unassigned.clone(),
            created_at: now,
            frozen_at: None,
        })?;

        let mut tasks = Vec::new();
        for (client_id, subset) in &partition.assignments {
            let task = ScanTask::new(
                Uuid::new_v4().to_string(),
                execution_id.clone(),
                definition.id.clone(),
                client_id.clone(),
                subset.clone(),
                now,
            );
            self.db.create_task(&task)?;
            tasks.push(task);
        }

        let started = ExecutionStarted {
            execution_id: execution_id.clone(),
            result_id: result_id.clone(),
            task_count: tasks.len(),
            assigned_targets: partition.assigned_count(),
            unassigned_targets: partition.unassigned.len(),
        };

        info!(
            scan_id = %definition.id,
            execution_id = %execution_id,
            tasks = tasks.len(),
            targets = targets.len(),
            "Execution started"
        );

        let frozen = self
            .aggregator
            .open_execution(
                &execution_id,
                &definition.id,
                &result_id,
                tasks.clone(),
                partition.unassigned,
                now,
            )
            .await?;
        if let Some(result) = frozen {
            // Nothing to dispatch; the result froze on open.
            self.on_frozen(&result).await;
            return Ok(started);
        }

        let cancel = CancellationToken::new();
        self.active.insert(execution_id.clone(), cancel.clone());

        // One lightweight unit of work per agent, not per address.
        for task in tasks {
            let client = clients
                .iter()
                .find(|c| c.client_id == task.client_id)
                .cloned();
            let this = self.clone();
            let definition = definition.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                this.run_task(task, client, definition, cancel).await;
            });
        }

        // Execution-level timeout supervisor.
        let this = self.clone();
        let exec_id = execution_id.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(this.policy.global_timeout) => {
                    match this.aggregator.force_freeze(&exec_id, Utc::now()).await {
                        Ok(Some(result)) => this.on_frozen(&result).await,
                        Ok(None) => {}
                        Err(e) => warn!(execution_id = %exec_id, error = %e, "Global timeout freeze failed"),
                    }
                }
            }
        });

        Ok(started)
    }

    /// Dispatch one task and supervise its deadline. Failures affect only
    /// this task; siblings keep running.
    async fn run_task(
        &self,
        task: ScanTask,
        client: Option<Client>,
        definition: ScanDefinition,
        cancel: CancellationToken,
    ) {
        let task_id = task.task_id.clone();
        let deadline = self.policy.task_deadline(task.targets.len());

        let Some(client) = client else {
            self.fail_task(&task_id, "client missing from partition snapshot".to_string())
                .await;
            return;
        };

        // Bounded per-agent pool: a client never holds more concurrent tasks
        // than its declared capacity, counted across executions.
        let load = self.aggregator.client_load(&client.client_id).await;
        if load >= client.capacity as usize {
            warn!(
                task_id = %task_id,
                client_id = %client.client_id,
                load,
                capacity = client.capacity,
                "Client at capacity, failing task"
            );
            self.fail_task(
                &task_id,
                format!("client {} at capacity ({})", client.client_id, client.capacity),
            )
            .await;
            return;
        }

        let dispatch = TaskDispatch {
            task_id: task_id.clone(),
            scan_id: task.scan_id.clone(),
            targets: task.targets.clone(),
            ports: definition.ports.clone(),
            scan_arguments: definition.scan_arguments.clone(),
            deadline: Utc::now() + chrono::Duration::from_std(deadline).unwrap_or_else(|_| chrono::Duration::zero()),
        };

        match self.transport.dispatch(&client, &dispatch).await {
            Ok(()) => {
                debug!(task_id = %task_id, client_id = %client.client_id, "Task dispatched");
                if let Err(e) = self.aggregator.mark_dispatched(&task_id, Utc::now()).await {
                    warn!(task_id = %task_id, error = %e, "Failed to record dispatch");
                    return;
                }

                // Per-task deadline timer; firing affects only this task.
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        match self.aggregator.task_timed_out(&task_id, Utc::now()).await {
                            Ok(Some(result)) => {
                                warn!(task_id = %task_id, error = %FleetError::TaskTimeout(task_id.clone()), "Task deadline expired");
                                self.on_frozen(&result).await;
                            }
                            Ok(None) => {}
                            Err(e) => warn!(task_id = %task_id, error = %e, "Timeout handling failed"),
                        }
                    }
                }
            }
            Err(e) => {
                warn!(task_id = %task_id, client_id = %client.client_id, error = %e, "Dispatch failed");
                self.fail_task(&task_id, e.to_string()).await;
            }
        }
    }

    async fn fail_task(&self, task_id: &str, error: String) {
        match self.aggregator.task_failed(task_id, error, Utc::now()).await {
            Ok(Some(result)) => self.on_frozen(&result).await,
            Ok(None) => {}
            Err(e) => warn!(task_id = %task_id, error = %e, "Failed to record task failure"),
        }
    }

    /// Inbound result submission from an agent. Returns the frozen result
    /// when this submission completed the execution.
    pub async fn submit_task_result(
        &self,
        task_id: &str,
        completed: bool,
        error: Option<String>,
        hosts: BTreeMap<IpAddr, HostRecord>,
    ) -> Result<Option<ScanResult>, FleetError> {
        let frozen = self
            .aggregator
            .submit_task_result(task_id, completed, error, hosts, Utc::now())
            .await?;
        if let Some(ref result) = frozen {
            self.on_frozen(result).await;
        }
        Ok(frozen)
    }

    /// Inbound progress signal: the agent started scanning.
    pub async fn mark_task_running(&self, task_id: &str) -> Result<(), FleetError> {
        self.aggregator.mark_running(task_id).await
    }

    /// Cooperative execution-level cancel: fail outstanding tasks locally,
    /// freeze as partial, and notify agents best-effort.
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<ScanResult, FleetError> {
        let (result, in_flight) = self
            .aggregator
            .cancel_execution(execution_id, Utc::now())
            .await?;

        let mut notify = Vec::new();
        for (client_id, task_id) in in_flight {
            if let Some(client) = self.registry.get(&client_id).await {
                notify.push((client, task_id));
            }
        }
        futures::future::join_all(notify.into_iter().map(|(client, task_id)| {
            let transport = self.transport.clone();
            async move {
                if let Err(e) = transport.cancel_task(&client, &task_id).await {
                    debug!(task_id = %task_id, error = %e, "Cancel notification failed (best-effort)");
                }
            }
        }))
        .await;

        self.on_frozen(&result).await;
        Ok(result)
    }

    /// Live status if the execution is in flight, otherwise the persisted
    /// outcome.
    pub async fn execution_status(&self, execution_id: &str) -> Option<serde_json::Value> {
        if let Some(live) = self.aggregator.execution_status(execution_id).await {
            return Some(live);
        }

        let result = self.db.get_result_for_execution(execution_id).ok()??;
        let tasks = self.db.list_tasks_for_execution(execution_id).ok()?;
        Some(json!({
            "execution_id": execution_id,
            "scan_id": result.scan_id,
            "result_id": result.result_id,
            "frozen": result.is_frozen(),
            "completeness": result.completeness.as_str(),
            "tasks": tasks,
            "hosts_seen": result.hosts.len(),
            "unassigned": result.unassigned.len(),
        }))
    }

    /// Freeze epilogue: stop supervision timers and produce the delta report
    /// against the previous frozen result, exactly once per pair.
    async fn on_frozen(&self, result: &ScanResult) {
        if let Some((_, token)) = self.active.remove(&result.execution_id) {
            token.cancel();
        }
        if let Err(e) = self.generate_delta(result) {
            warn!(result_id = %result.result_id, error = %e, "Delta generation failed");
        }
    }

    fn generate_delta(&self, current: &ScanResult) -> Result<(), FleetError> {
        let baseline = match self
            .db
            .latest_frozen_result_before(&current.scan_id, &current.created_at.to_rfc3339())?
        {
            Some(baseline) => baseline,
            None => {
                debug!(result_id = %current.result_id, "No baseline result, skipping delta");
                return Ok(());
            }
        };

        if self
            .db
            .report_exists(&baseline.result_id, &current.result_id)?
        {
            return Ok(());
        }

        let report = compute_delta(&baseline, current)?;
        let report_id = Uuid::new_v4().to_string();
        self.db.save_report(&report_id, &report, Utc::now())?;
        info!(
            report_id = %report_id,
            scan_id = %current.scan_id,
            baseline = %baseline.result_id,
            current = %current.result_id,
            has_changes = report.has_changes,
            new_hosts = report.new_hosts.len(),
            removed_hosts = report.removed_hosts.len(),
            new_ports = report.new_ports_count(),
            closed_ports = report.closed_ports_count(),
            "Delta report generated"
        );
        Ok(())
    }
}
