use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::errors::FleetError;
use crate::models::{Completeness, HostRecord, ScanResult, ScanTask, TaskState};

/// Mutable aggregation state for one scan execution. Always accessed under
/// the per-execution mutex so host-map merges and the all-terminal check are
/// linearizable.
struct Aggregation {
    execution_id: String,
    scan_id: String,
    result_id: String,
    tasks: HashMap<String, ScanTask>,
    hosts: BTreeMap<IpAddr, HostRecord>,
    /// Which task contributed each address, for conflict detection.
    sources: HashMap<IpAddr, String>,
    unassigned: Vec<IpAddr>,
    created_at: DateTime<Utc>,
    cancelled: bool,
    conflicts: u64,
}

impl Aggregation {
    fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.state.is_terminal())
    }
}

/// Folds per-task results into one [`ScanResult`] per scan execution.
///
/// State for different executions is independent and proceeds in parallel;
/// state for one execution is serialized through its own mutex. A result
/// becomes visible to delta comparison only once frozen.
pub struct ResultAggregator {
    executions: DashMap<String, Arc<Mutex<Aggregation>>>,
    task_index: DashMap<String, String>,
    db: Database,
}

impl ResultAggregator {
    pub fn new(db: Database) -> Self {
        Self {
            executions: DashMap::new(),
            task_index: DashMap::new(),
            db,
        }
    }

    /// Register a starting execution. With no tasks at all the execution has
    /// nothing outstanding and freezes on the spot.
    pub async fn open_execution(
        &self,
        execution_id: &str,
        scan_id: &str,
        result_id: &str,
        tasks: Vec<ScanTask>,
        unassigned: Vec<IpAddr>,
        created_at: DateTime<Utc>,
    ) -> Result<Option<ScanResult>, FleetError> {
        for task in &tasks {
            self.task_index
                .insert(task.task_id.clone(), execution_id.to_string());
        }

        let aggregation = Aggregation {
            execution_id: execution_id.to_string(),
            scan_id: scan_id.to_string(),
            result_id: result_id.to_string(),
            tasks: tasks.into_iter().map(|t| (t.task_id.clone(), t)).collect(),
            hosts: BTreeMap::new(),
            sources: HashMap::new(),
            unassigned,
            created_at,
            cancelled: false,
            conflicts: 0,
        };

        let handle = Arc::new(Mutex::new(aggregation));
        self.executions
            .insert(execution_id.to_string(), handle.clone());

        let mut agg = handle.lock().await;
        if agg.all_terminal() {
            let result = self.freeze_locked(&mut agg, Utc::now())?;
            drop(agg);
            self.executions.remove(execution_id);
            return Ok(Some(result));
        }
        Ok(None)
    }

    pub async fn mark_dispatched(&self, task_id: &str, now: DateTime<Utc>) -> Result<(), FleetError> {
        let handle = self.lookup(task_id)?;
        let mut agg = handle.lock().await;
        let task = agg
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::UnknownTask(task_id.to_string()))?;
        task.mark_dispatched(now)?;
        self.db.update_task(task)?;
        Ok(())
    }

    /// Agent progress signal: `Dispatched -> Running`.
    pub async fn mark_running(&self, task_id: &str) -> Result<(), FleetError> {
        let handle = self.lookup(task_id)?;
        let mut agg = handle.lock().await;
        let task = agg
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::UnknownTask(task_id.to_string()))?;
        task.mark_running()?;
        self.db.update_task(task)?;
        Ok(())
    }

    /// Fold an agent's submitted result into the execution. Returns the
    /// frozen result if this submission completed the execution.
    ///
    /// Late submissions for cancelled or already-frozen executions are
    /// discarded, not errors: the agent did its work, the execution just no
    /// longer wants it.
    pub async fn submit_task_result(
        &self,
        task_id: &str,
        completed: bool,
        error: Option<String>,
        hosts: BTreeMap<IpAddr, HostRecord>,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanResult>, FleetError> {
        let handle = match self.lookup(task_id) {
            Ok(handle) => handle,
            Err(e) => {
                // Distinguish a result for a finished execution from a task
                // id this coordinator never issued.
                if self.db.task_exists(task_id)? {
                    info!(task_id = %task_id, "Discarding result for finished execution");
                    return Ok(None);
                }
                return Err(e);
            }
        };

        let mut agg = handle.lock().await;
        if agg.cancelled {
            info!(task_id = %task_id, execution_id = %agg.execution_id, "Discarding result for cancelled execution");
            return Ok(None);
        }

        {
            let task = agg
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::UnknownTask(task_id.to_string()))?;
            if !matches!(task.state, TaskState::Dispatched | TaskState::Running) {
                return Err(FleetError::InvalidTransition(format!(
                    "task {} cannot accept a result in state {}",
                    task_id, task.state
                )));
            }
            let state = if completed {
                TaskState::Completed
            } else {
                TaskState::Failed
            };
            task.finish(state, error, now)?;
            self.db.update_task(task)?;
        }

        self.merge_hosts(&mut agg, task_id, hosts);
        self.try_freeze(agg, now).await
    }

    /// Record a dispatch failure: the task goes straight to `Failed` without
    /// blocking sibling tasks.
    pub async fn task_failed(
        &self,
        task_id: &str,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanResult>, FleetError> {
        self.finish_if_live(task_id, TaskState::Failed, Some(error), now)
            .await
    }

    /// Deadline expiry for one task. A timer firing after the task reached a
    /// terminal state is a no-op.
    pub async fn task_timed_out(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanResult>, FleetError> {
        self.finish_if_live(
            task_id,
            TaskState::TimedOut,
            Some("no result before deadline".to_string()),
            now,
        )
        .await
    }

    async fn finish_if_live(
        &self,
        task_id: &str,
        state: TaskState,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanResult>, FleetError> {
        let handle = match self.lookup(task_id) {
            Ok(handle) => handle,
            Err(_) => return Ok(None),
        };
        let mut agg = handle.lock().await;
        {
            let task = agg
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::UnknownTask(task_id.to_string()))?;
            if task.state.is_terminal() {
                return Ok(None);
            }
            task.finish(state, error, now)?;
            self.db.update_task(task)?;
        }
        self.try_freeze(agg, now).await
    }

    /// Execution-level cancellation: every non-terminal task fails locally
    /// and the execution freezes. Returns the frozen result plus the
    /// (client, task) pairs that were still in flight, for best-effort agent
    /// notification.
    pub async fn cancel_execution(
        &self,
        execution_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(ScanResult, Vec<(String, String)>), FleetError> {
        let handle = self
            .executions
            .get(execution_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FleetError::UnknownExecution(execution_id.to_string()))?;

        let mut agg = handle.lock().await;
        agg.cancelled = true;

        let mut in_flight = Vec::new();
        for task in agg.tasks.values_mut() {
            if !task.state.is_terminal() {
                in_flight.push((task.client_id.clone(), task.task_id.clone()));
                task.finish(
                    TaskState::Failed,
                    Some("execution cancelled".to_string()),
                    now,
                )?;
                self.db.update_task(task)?;
            }
        }

        let result = self.freeze_locked(&mut agg, now)?;
        drop(agg);
        self.executions.remove(execution_id);
        info!(execution_id = %execution_id, in_flight = in_flight.len(), "Execution cancelled");
        Ok((result, in_flight))
    }

    /// Global execution timeout: time out whatever is still outstanding and
    /// freeze as partial. No-op if the execution already froze.
    pub async fn force_freeze(
        &self,
        execution_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanResult>, FleetError> {
        let handle = match self.executions.get(execution_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };

        let mut agg = handle.lock().await;
        for task in agg.tasks.values_mut() {
            if !task.state.is_terminal() {
                task.finish(
                    TaskState::TimedOut,
                    Some("execution timeout".to_string()),
                    now,
                )?;
                self.db.update_task(task)?;
            }
        }

        let result = self.freeze_locked(&mut agg, now)?;
        drop(agg);
        self.executions.remove(execution_id);
        warn!(execution_id = %execution_id, "Execution hit global timeout, frozen as partial");
        Ok(Some(result))
    }

    /// Number of tasks currently dispatched or running on one client across
    /// all live executions. Backs the per-agent capacity bound.
    pub async fn client_load(&self, client_id: &str) -> usize {
        let handles: Vec<Arc<Mutex<Aggregation>>> = self
            .executions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut count = 0;
        for handle in handles {
            let agg = handle.lock().await;
            count += agg
                .tasks
                .values()
                .filter(|t| {
                    t.client_id == client_id
                        && matches!(t.state, TaskState::Dispatched | TaskState::Running)
                })
                .count();
        }
        count
    }

    /// Live view of an in-flight execution, if it has not frozen yet.
    pub async fn execution_status(&self, execution_id: &str) -> Option<serde_json::Value> {
        let handle = self.executions.get(execution_id)?.value().clone();
        let agg = handle.lock().await;
        let mut states: BTreeMap<&str, &str> = BTreeMap::new();
        for (task_id, task) in &agg.tasks {
            states.insert(task_id, task.state.as_str());
        }
        Some(json!({
            "execution_id": agg.execution_id,
            "scan_id": agg.scan_id,
            "result_id": agg.result_id,
            "frozen": false,
            "cancelled": agg.cancelled,
            "tasks": states,
            "hosts_seen": agg.hosts.len(),
            "unassigned": agg.unassigned.len(),
            "conflicts": agg.conflicts,
        }))
    }

    fn lookup(&self, task_id: &str) -> Result<Arc<Mutex<Aggregation>>, FleetError> {
        let execution_id = self
            .task_index
            .get(task_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FleetError::UnknownTask(task_id.to_string()))?;
        self.executions
            .get(&execution_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FleetError::UnknownTask(task_id.to_string()))
    }

    fn merge_hosts(
        &self,
        agg: &mut Aggregation,
        task_id: &str,
        hosts: BTreeMap<IpAddr, HostRecord>,
    ) {
        for (addr, mut record) in hosts {
            record.normalize();
            if let Some(previous) = agg.sources.insert(addr, task_id.to_string()) {
                if previous != task_id {
                    // Partition invariant violation or an agent scanning
                    // outside its subset; the later write wins.
                    agg.conflicts += 1;
                    warn!(
                        execution_id = %agg.execution_id,
                        address = %addr,
                        previous_task = %previous,
                        task_id = %task_id,
                        error = %FleetError::AggregationConflict(addr.to_string()),
                        "Duplicate host data, overwriting"
                    );
                }
            }
            agg.hosts.insert(addr, record);
        }
    }

    /// Freeze the execution if every task is terminal. Consumes the lock
    /// guard; the aggregation is dropped from the live map on freeze.
    async fn try_freeze(
        &self,
        mut agg: tokio::sync::MutexGuard<'_, Aggregation>,
        now: DateTime<Utc>,
    ) -> Result<Option<ScanResult>, FleetError> {
        if !agg.all_terminal() {
            return Ok(None);
        }
        let execution_id = agg.execution_id.clone();
        let result = self.freeze_locked(&mut agg, now)?;
        drop(agg);
        self.executions.remove(&execution_id);
        Ok(Some(result))
    }

    fn freeze_locked(
        &self,
        agg: &mut Aggregation,
        now: DateTime<Utc>,
    ) -> Result<ScanResult, FleetError> {
        let full = agg.unassigned.is_empty()
            && agg.tasks.values().all(|t| t.state == TaskState::Completed);
        let completeness = if full {
            Completeness::Full
        } else {
            Completeness::Partial
        };

        let mut task_ids: Vec<String> = agg.tasks.keys().cloned().collect();
        task_ids.sort();
        for task_id in &task_ids {
            self.task_index.remove(task_id);
        }

        let result = ScanResult {
            result_id: agg.result_id.clone(),
            scan_id: agg.scan_id.clone(),
            execution_id: agg.execution_id.clone(),
            completeness,
            hosts: agg.hosts.clone(),
            task_ids,
            unassigned: agg.unassigned.clone(),
            created_at: agg.created_at,
            frozen_at: Some(now),
        };
        self.db.freeze_result(&result)?;

        debug!(
            execution_id = %agg.execution_id,
            result_id = %agg.result_id,
            completeness = %completeness,
            hosts = result.hosts.len(),
            conflicts = agg.conflicts,
            "Execution frozen"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostState, ScanDefinition};

    fn setup(task_count: usize, unassigned: Vec<IpAddr>) -> (ResultAggregator, Vec<ScanTask>) {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        db.create_scan(&ScanDefinition::new(
            "scan-1".into(),
            "seed".into(),
            "10.0.0.0/28".into(),
            "1-1000".into(),
            now,
        ))
        .unwrap();

        let mut tasks = Vec::new();
        for i in 0..task_count {
            let mut task = ScanTask::new(
                format!("task-{}", i),
                "exec-1".into(),
                "scan-1".into(),
                format!("client-{}", i),
                vec![format!("10.0.0.{}", i + 1).parse().unwrap()],
                now,
            );
            task.mark_dispatched(now).unwrap();
            db.create_task(&task).unwrap();
            db.update_task(&task).unwrap();
            tasks.push(task);
        }

        db.create_result(&ScanResult {
            result_id: "res-1".into(),
            scan_id: "scan-1".into(),
            execution_id: "exec-1".into(),
            completeness: Completeness::Partial,
            hosts: BTreeMap::new(),
            task_ids: vec![],
            unassigned: unassigned.clone(),
            created_at: now,
            frozen_at: None,
        })
        .unwrap();

        (ResultAggregator::new(db), tasks)
    }

    fn up_host(ports: &[u16]) -> HostRecord {
        HostRecord {
            state: HostState::Up,
            open_ports: ports.to_vec(),
            port_details: BTreeMap::new(),
        }
    }

    async fn open(aggregator: &ResultAggregator, tasks: &[ScanTask], unassigned: Vec<IpAddr>) {
        aggregator
            .open_execution("exec-1", "scan-1", "res-1", tasks.to_vec(), unassigned, Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_two_completions_freeze_full() {
        let (aggregator, tasks) = setup(2, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        let mut hosts = BTreeMap::new();
        hosts.insert("10.0.0.1".parse().unwrap(), up_host(&[22]));
        let first = aggregator
            .submit_task_result("task-0", true, None, hosts, Utc::now())
            .await
            .unwrap();
        assert!(first.is_none());

        let mut hosts = BTreeMap::new();
        hosts.insert("10.0.0.2".parse().unwrap(), up_host(&[80]));
        let frozen = aggregator
            .submit_task_result("task-1", true, None, hosts, Utc::now())
            .await
            .unwrap()
            .expect("second completion freezes");

        assert_eq!(frozen.completeness, Completeness::Full);
        assert_eq!(frozen.hosts.len(), 2);
        assert!(frozen.is_frozen());
    }

    #[tokio::test]
    async fn test_failed_task_freezes_partial() {
        let (aggregator, tasks) = setup(2, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        aggregator
            .submit_task_result("task-0", true, None, BTreeMap::new(), Utc::now())
            .await
            .unwrap();
        let frozen = aggregator
            .task_failed("task-1", "client unreachable".into(), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frozen.completeness, Completeness::Partial);
    }

    #[tokio::test]
    async fn test_unassigned_targets_force_partial() {
        let unassigned: Vec<IpAddr> = vec!["192.168.9.9".parse().unwrap()];
        let (aggregator, tasks) = setup(1, unassigned.clone());
        open(&aggregator, &tasks, unassigned.clone()).await;

        let frozen = aggregator
            .submit_task_result("task-0", true, None, BTreeMap::new(), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frozen.completeness, Completeness::Partial);
        assert_eq!(frozen.unassigned, unassigned);
    }

    #[tokio::test]
    async fn test_timeout_on_silent_task_freezes_partial() {
        let (aggregator, tasks) = setup(2, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        let mut hosts = BTreeMap::new();
        hosts.insert("10.0.0.1".parse().unwrap(), up_host(&[22]));
        aggregator
            .submit_task_result("task-0", true, None, hosts, Utc::now())
            .await
            .unwrap();

        let frozen = aggregator
            .task_timed_out("task-1", Utc::now())
            .await
            .unwrap()
            .expect("deadline on the silent task freezes the execution");
        assert_eq!(frozen.completeness, Completeness::Partial);
        // The completed task's data survives.
        assert_eq!(frozen.hosts.len(), 1);
    }

    #[tokio::test]
    async fn test_timer_after_terminal_state_is_noop() {
        let (aggregator, tasks) = setup(1, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        aggregator
            .submit_task_result("task-0", true, None, BTreeMap::new(), Utc::now())
            .await
            .unwrap()
            .unwrap();

        // Execution is gone; the late timer must not error or double-freeze.
        let outcome = aggregator.task_timed_out("task-0", Utc::now()).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_address_logs_conflict_and_overwrites() {
        let (aggregator, tasks) = setup(2, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        let mut hosts = BTreeMap::new();
        hosts.insert(addr, up_host(&[22]));
        aggregator
            .submit_task_result("task-0", true, None, hosts, Utc::now())
            .await
            .unwrap();

        let mut hosts = BTreeMap::new();
        hosts.insert(addr, up_host(&[443]));
        let frozen = aggregator
            .submit_task_result("task-1", true, None, hosts, Utc::now())
            .await
            .unwrap()
            .unwrap();

        // Later write wins; the event is non-fatal.
        assert_eq!(frozen.hosts[&addr].open_ports, vec![443]);
        assert_eq!(frozen.completeness, Completeness::Full);
    }

    #[tokio::test]
    async fn test_second_result_for_same_task_rejected() {
        let (aggregator, tasks) = setup(2, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        aggregator
            .submit_task_result("task-0", true, None, BTreeMap::new(), Utc::now())
            .await
            .unwrap();
        let second = aggregator
            .submit_task_result("task-0", true, None, BTreeMap::new(), Utc::now())
            .await;
        assert!(matches!(second, Err(FleetError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_unknown_task_rejected() {
        let (aggregator, tasks) = setup(1, vec![]);
        open(&aggregator, &tasks, vec![]).await;
        let outcome = aggregator
            .submit_task_result("no-such-task", true, None, BTreeMap::new(), Utc::now())
            .await;
        assert!(matches!(outcome, Err(FleetError::UnknownTask(_))));
    }

    #[tokio::test]
    async fn test_result_after_freeze_discarded() {
        let (aggregator, tasks) = setup(1, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        aggregator
            .submit_task_result("task-0", true, None, BTreeMap::new(), Utc::now())
            .await
            .unwrap()
            .unwrap();

        // The task exists in the database but its execution has frozen.
        let late = aggregator
            .submit_task_result("task-0", true, None, BTreeMap::new(), Utc::now())
            .await
            .unwrap();
        assert!(late.is_none());
    }

    #[tokio::test]
    async fn test_cancel_fails_in_flight_and_discards_late_results() {
        let (aggregator, tasks) = setup(2, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        let (result, in_flight) = aggregator
            .cancel_execution("exec-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(result.completeness, Completeness::Partial);
        assert_eq!(in_flight.len(), 2);

        // A straggler result after cancellation is discarded.
        let mut hosts = BTreeMap::new();
        hosts.insert("10.0.0.1".parse::<IpAddr>().unwrap(), up_host(&[22]));
        let late = aggregator
            .submit_task_result("task-0", true, None, hosts, Utc::now())
            .await
            .unwrap();
        assert!(late.is_none());
    }

    #[tokio::test]
    async fn test_open_execution_with_no_tasks_freezes_immediately() {
        let unassigned: Vec<IpAddr> = vec!["192.168.9.9".parse().unwrap()];
        let (aggregator, _) = setup(0, unassigned.clone());
        let frozen = aggregator
            .open_execution("exec-1", "scan-1", "res-1", vec![], unassigned, Utc::now())
            .await
            .unwrap()
            .expect("nothing outstanding, freezes on open");
        assert_eq!(frozen.completeness, Completeness::Partial);
    }

    #[tokio::test]
    async fn test_force_freeze_times_out_stragglers() {
        let (aggregator, tasks) = setup(2, vec![]);
        open(&aggregator, &tasks, vec![]).await;

        let frozen = aggregator
            .force_freeze("exec-1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frozen.completeness, Completeness::Partial);
        assert!(aggregator.execution_status("exec-1").await.is_none());
    }
}
