use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FleetError;

/// Lifecycle of one agent's assignment within a scan execution.
///
/// `Pending -> Dispatched -> Running -> {Completed, Failed, TimedOut}`.
/// Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Pending,
    Dispatched,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "dispatched" => Some(Self::Dispatched),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timed-out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTask {
    pub task_id: String,
    pub execution_id: String,
    pub scan_id: String,
    pub client_id: String,
    /// Disjoint address subset assigned to this client.
    pub targets: Vec<IpAddr>,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ScanTask {
    pub fn new(
        task_id: String,
        execution_id: String,
        scan_id: String,
        client_id: String,
        targets: Vec<IpAddr>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            execution_id,
            scan_id,
            client_id,
            targets,
            state: TaskState::Pending,
            created_at: now,
            dispatched_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn mark_dispatched(&mut self, now: DateTime<Utc>) -> Result<(), FleetError> {
        if self.state != TaskState::Pending {
            return Err(self.transition_error(TaskState::Dispatched));
        }
        self.state = TaskState::Dispatched;
        self.dispatched_at = Some(now);
        Ok(())
    }

    /// Agent progress signal.
    pub fn mark_running(&mut self) -> Result<(), FleetError> {
        match self.state {
            TaskState::Dispatched => {
                self.state = TaskState::Running;
                Ok(())
            }
            TaskState::Running => Ok(()),
            _ => Err(self.transition_error(TaskState::Running)),
        }
    }

    /// Move the task to a terminal state. Rejected if already terminal or if
    /// `state` is not terminal.
    pub fn finish(
        &mut self,
        state: TaskState,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        if !state.is_terminal() {
            return Err(FleetError::InvalidTransition(format!(
                "{} is not a terminal task state",
                state
            )));
        }
        if self.state.is_terminal() {
            return Err(self.transition_error(state));
        }
        self.state = state;
        self.completed_at = Some(now);
        self.error = error;
        Ok(())
    }

    fn transition_error(&self, target: TaskState) -> FleetError {
        FleetError::InvalidTransition(format!(
            "task {}: {} -> {}",
            self.task_id, self.state, target
        ))
    }
}
