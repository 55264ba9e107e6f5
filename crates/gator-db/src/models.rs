//! Serializable domain models shared between `gator-core` and `gator-cli`.
//!
//! These types are the on-disk shape of a session: everything here derives
//! `Serialize`/`Deserialize` because it is either loaded from a `PlanSpec`
//! JSON file or round-tripped through a session checkpoint (see
//! [`crate::store`]).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Status of a task in the queue's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "running" => Ok(Self::Running),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------
// Complexity
// ---------------------------------------------------------------------------

/// Estimated complexity of a planned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Coordinator phase
// ---------------------------------------------------------------------------

/// Phase of the coordinator's session-level state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PlanSelection,
    Planning,
    Executing,
    Synthesis,
    Revision,
    Consolidating,
    Complete,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PlanSelection => "plan_selection",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Synthesis => "synthesis",
            Self::Revision => "revision",
            Self::Consolidating => "consolidating",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Plan input
// ---------------------------------------------------------------------------

/// A single task as produced by the (out-of-scope) planning subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    /// Stable identifier, unique within the plan.
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub complexity: Complexity,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub source_url: Option<String>,
}

/// The immutable input to a session: the full task graph plus scheduling
/// metadata, as produced by the planning subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSpec {
    pub id: String,
    pub objective: String,
    #[serde(default)]
    pub summary: String,
    pub tasks: Vec<PlannedTask>,
    #[serde(default)]
    pub dependency_graph: HashMap<String, Vec<String>>,
    pub execution_order: Vec<Vec<String>>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Queued task (lifecycle fields layered on a PlannedTask)
// ---------------------------------------------------------------------------

/// A [`PlannedTask`] plus the mutable lifecycle fields owned by the task
/// queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    #[serde(flatten)]
    pub task: PlannedTask,
    pub status: TaskStatus,
    #[serde(default)]
    pub claimed_by: String,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_context: String,
    #[serde(default)]
    pub verified_commit_count: u32,
}

impl QueuedTask {
    /// Build a freshly-loaded task in the `pending` state.
    pub fn new(task: PlannedTask) -> Self {
        Self {
            task,
            status: TaskStatus::Pending,
            claimed_by: String::new(),
            claimed_at: None,
            failure_context: String::new(),
            verified_commit_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }
}

/// A snapshot of per-status counts, returned by `TaskQueueOps::status`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub claimed: usize,
    pub running: usize,
    pub awaiting_approval: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Retry state
// ---------------------------------------------------------------------------

/// Per-task retry bookkeeping maintained by the retry & verification layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRetryState {
    pub task_id: String,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub commit_counts: Vec<u32>,
}

impl TaskRetryState {
    pub fn new(task_id: impl Into<String>, max_retries: u32) -> Self {
        Self {
            task_id: task_id.into(),
            retry_count: 0,
            max_retries,
            last_error: String::new(),
            commit_counts: Vec::new(),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

// ---------------------------------------------------------------------------
// Group decisions
// ---------------------------------------------------------------------------

/// An operator's resolution of a `GroupPartial` pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupDecision {
    Continue,
    Abort,
    RetryFailed,
}

impl fmt::Display for GroupDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Continue => "continue",
            Self::Abort => "abort",
            Self::RetryFailed => "retry_failed",
        };
        f.write_str(s)
    }
}

impl FromStr for GroupDecision {
    type Err = GroupDecisionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "continue" => Ok(Self::Continue),
            "abort" => Ok(Self::Abort),
            "retry_failed" | "retry-failed" => Ok(Self::RetryFailed),
            other => Err(GroupDecisionParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupDecisionParseError(pub String);

impl fmt::Display for GroupDecisionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid group decision: {:?}", self.0)
    }
}

impl std::error::Error for GroupDecisionParseError {}

/// Whether a finished group needs an operator decision before the session
/// can advance past it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum GroupDecisionState {
    #[default]
    NotNeeded,
    AwaitingDecision {
        group_index: usize,
        failed_tasks: Vec<String>,
    },
    Decided {
        group_index: usize,
        decision: GroupDecision,
    },
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The coordinator's durable top-level state. Checkpointed to disk on every
/// mutation (see [`crate::store`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub phase: Phase,
    pub plan: PlanSpec,
    #[serde(default)]
    pub tasks: HashMap<String, QueuedTask>,
    #[serde(default)]
    pub assignments: HashMap<String, String>,
    #[serde(default)]
    pub completed_task_ids: Vec<String>,
    #[serde(default)]
    pub failed_task_ids: Vec<String>,
    #[serde(default)]
    pub group_cursor: usize,
    #[serde(default)]
    pub retry_states: HashMap<String, TaskRetryState>,
    #[serde(default)]
    pub pending_approvals: HashMap<String, String>,
    #[serde(default)]
    pub group_decision: GroupDecisionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::Claimed,
            TaskStatus::Running,
            TaskStatus::AwaitingApproval,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn group_decision_display_roundtrip() {
        let variants = [
            GroupDecision::Continue,
            GroupDecision::Abort,
            GroupDecision::RetryFailed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: GroupDecision = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn group_decision_accepts_hyphen_variant() {
        assert_eq!(
            "retry-failed".parse::<GroupDecision>().unwrap(),
            GroupDecision::RetryFailed
        );
    }

    #[test]
    fn retry_state_exhausted() {
        let mut state = TaskRetryState::new("t1", 2);
        assert!(!state.exhausted());
        state.retry_count = 2;
        assert!(state.exhausted());
    }
}
