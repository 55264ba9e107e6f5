//! Authoritative task queue (spec §4.2): dependency graph, claim/complete/
//! fail/release transitions, stale-claim recovery, and checkpointing.

pub mod event_queue;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use gator_db::models::{PlanSpec, QueueStatus, QueuedTask, Session, TaskStatus};
use gator_db::store;

use crate::error::CoreError;

/// Operation surface shared by the core queue and every decorator layered on
/// top of it (spec §9: "trait/interface `TaskQueueOps` plus three concrete
/// types that each embed or wrap the next").
pub trait TaskQueueOps {
    fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedTask>, CoreError>;
    /// Like `claim_next`, but only considers tasks whose id is in `group`.
    /// The coordinator uses this to keep dispatch bounded to the
    /// `execution_order` group it is currently running, so a later group's
    /// task is never claimed just because its dependencies happen to
    /// resolve early (spec §9).
    fn claim_next_in(&self, worker_id: &str, group: &HashSet<String>) -> Result<Option<QueuedTask>, CoreError>;
    fn mark_running(&self, task_id: &str) -> Result<(), CoreError>;
    fn complete(&self, task_id: &str) -> Result<Vec<String>, CoreError>;
    fn fail(&self, task_id: &str, reason: &str) -> Result<(), CoreError>;
    fn release(&self, task_id: &str, reason: &str) -> Result<(), CoreError>;
    /// Put a `failed` task back to `pending` so a future group pass can
    /// claim it again (the operator's `retry_failed` group decision).
    fn requeue_failed(&self, task_id: &str) -> Result<(), CoreError>;
    fn claim_stale_before(&self, cutoff: DateTime<Utc>) -> Vec<String>;
    fn status(&self) -> QueueStatus;
    /// Like `status`, but counts only tasks whose id is in `group`.
    fn status_in(&self, group: &HashSet<String>) -> QueueStatus;
    fn get_task(&self, id: &str) -> Option<QueuedTask>;
    fn get_instance_tasks(&self, worker_id: &str) -> Vec<QueuedTask>;
    fn is_complete(&self) -> bool;
    /// All task ids known to the queue, in declaration order.
    fn task_ids(&self) -> Vec<String>;
}

struct QueueState {
    tasks: HashMap<String, QueuedTask>,
    /// Declaration order, used as the claim tie-break within equal priority.
    order: Vec<String>,
}

/// The core task queue. Safe for concurrent callers; every mutating method
/// acquires the internal mutex for the duration of the state change only.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    plan_id: String,
}

impl TaskQueue {
    /// Build a queue from a validated [`PlanSpec`] (see [`crate::plan`] for
    /// the loader that enforces invariants P1-P3 before this is called).
    pub fn from_plan(plan: &PlanSpec) -> Self {
        let mut tasks = HashMap::new();
        let mut order = Vec::new();
        for task in &plan.tasks {
            order.push(task.id.clone());
            tasks.insert(task.id.clone(), QueuedTask::new(task.clone()));
        }
        Self {
            state: Mutex::new(QueueState { tasks, order }),
            plan_id: plan.id.clone(),
        }
    }

    /// Rebuild a queue from an existing session's task map (round-trip
    /// companion to `save_state`, used by session resume).
    pub fn from_session(session: &Session) -> Self {
        let order: Vec<String> = session.plan.tasks.iter().map(|t| t.id.clone()).collect();
        Self {
            state: Mutex::new(QueueState {
                tasks: session.tasks.clone(),
                order,
            }),
            plan_id: session.plan.id.clone(),
        }
    }

    fn deps_satisfied(tasks: &HashMap<String, QueuedTask>, task: &QueuedTask) -> bool {
        task.task
            .dependencies
            .iter()
            .all(|dep| matches!(tasks.get(dep), Some(t) if t.status == TaskStatus::Completed))
    }

    /// Dependents of `task_id` whose every dependency is now `completed`.
    fn unblocked_after_completion(tasks: &HashMap<String, QueuedTask>, task_id: &str) -> Vec<String> {
        tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.task.dependencies.iter().any(|d| d == task_id))
            .filter(|t| Self::deps_satisfied(tasks, t))
            .map(|t| t.id().to_owned())
            .collect()
    }

    fn require_status(
        tasks: &HashMap<String, QueuedTask>,
        task_id: &str,
        allowed: &[TaskStatus],
        operation: &str,
    ) -> Result<(), CoreError> {
        let task = tasks
            .get(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_owned()))?;
        if !allowed.contains(&task.status) {
            return Err(CoreError::InvalidTransition {
                task_id: task_id.to_owned(),
                operation: operation.to_owned(),
                status: task.status.to_string(),
            });
        }
        Ok(())
    }

    /// Persist the current queue state into `session` and checkpoint it
    /// atomically under `root` (spec §6: write-to-temp-then-rename).
    pub fn save_state(&self, root: &Path, session: &mut Session) -> Result<(), anyhow::Error> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        session.tasks = state.tasks.clone();
        session.updated_at = Utc::now();
        store::save_checkpoint(root, session)
    }

    /// Rebuild a queue from a checkpoint written by `save_state`.
    pub fn load_state(root: &Path, session_id: &str) -> Result<(Self, Session), anyhow::Error> {
        let session = store::load_checkpoint(root, session_id)?;
        let queue = Self::from_session(&session);
        Ok((queue, session))
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }
}

impl TaskQueue {
    fn claim_next_filtered(
        &self,
        worker_id: &str,
        group: Option<&HashSet<String>>,
    ) -> Result<Option<QueuedTask>, CoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let QueueState { tasks, order } = &mut *state;

        let candidate_id = order
            .iter()
            .filter(|id| group.is_none_or(|g| g.contains(id.as_str())))
            .filter(|id| tasks.get(*id).is_some_and(|t| t.status == TaskStatus::Pending))
            .filter(|id| Self::deps_satisfied(tasks, &tasks[*id]))
            .min_by_key(|id| (tasks[*id].task.priority, order.iter().position(|o| o == *id)))
            .cloned();

        let Some(id) = candidate_id else {
            return Ok(None);
        };

        let task = tasks.get_mut(&id).expect("candidate id must exist");
        task.status = TaskStatus::Claimed;
        task.claimed_by = worker_id.to_owned();
        task.claimed_at = Some(Utc::now());
        Ok(Some(task.clone()))
    }

    fn status_filtered(&self, group: Option<&HashSet<String>>) -> QueueStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut status = QueueStatus::default();
        for task in state
            .tasks
            .values()
            .filter(|t| group.is_none_or(|g| g.contains(t.id())))
        {
            status.total += 1;
            match task.status {
                TaskStatus::Pending => status.pending += 1,
                TaskStatus::Claimed => status.claimed += 1,
                TaskStatus::Running => status.running += 1,
                TaskStatus::AwaitingApproval => status.awaiting_approval += 1,
                TaskStatus::Completed => status.completed += 1,
                TaskStatus::Failed => status.failed += 1,
            }
        }
        status
    }
}

impl TaskQueueOps for TaskQueue {
    fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedTask>, CoreError> {
        self.claim_next_filtered(worker_id, None)
    }

    fn claim_next_in(&self, worker_id: &str, group: &HashSet<String>) -> Result<Option<QueuedTask>, CoreError> {
        self.claim_next_filtered(worker_id, Some(group))
    }

    fn mark_running(&self, task_id: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::require_status(&state.tasks, task_id, &[TaskStatus::Claimed], "mark_running")?;
        state.tasks.get_mut(task_id).unwrap().status = TaskStatus::Running;
        Ok(())
    }

    fn complete(&self, task_id: &str) -> Result<Vec<String>, CoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::require_status(&state.tasks, task_id, &[TaskStatus::Running], "complete")?;
        state.tasks.get_mut(task_id).unwrap().status = TaskStatus::Completed;
        Ok(Self::unblocked_after_completion(&state.tasks, task_id))
    }

    fn fail(&self, task_id: &str, reason: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::require_status(
            &state.tasks,
            task_id,
            &[TaskStatus::Claimed, TaskStatus::Running],
            "fail",
        )?;
        let task = state.tasks.get_mut(task_id).unwrap();
        task.status = TaskStatus::Failed;
        task.failure_context = reason.to_owned();
        Ok(())
    }

    fn release(&self, task_id: &str, reason: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::require_status(
            &state.tasks,
            task_id,
            &[
                TaskStatus::Claimed,
                TaskStatus::Running,
                TaskStatus::AwaitingApproval,
            ],
            "release",
        )?;
        let task = state.tasks.get_mut(task_id).unwrap();
        task.status = TaskStatus::Pending;
        task.claimed_by = String::new();
        task.claimed_at = None;
        task.failure_context = reason.to_owned();
        Ok(())
    }

    fn requeue_failed(&self, task_id: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::require_status(&state.tasks, task_id, &[TaskStatus::Failed], "requeue_failed")?;
        let task = state.tasks.get_mut(task_id).unwrap();
        task.status = TaskStatus::Pending;
        task.claimed_by = String::new();
        task.claimed_at = None;
        task.failure_context = String::new();
        Ok(())
    }

    fn claim_stale_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let stale_ids: Vec<String> = state
            .tasks
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Claimed | TaskStatus::Running | TaskStatus::AwaitingApproval
                )
            })
            .filter(|t| t.claimed_at.is_some_and(|at| at < cutoff))
            .map(|t| t.id().to_owned())
            .collect();

        for id in &stale_ids {
            let task = state.tasks.get_mut(id).unwrap();
            task.status = TaskStatus::Pending;
            task.claimed_by = String::new();
            task.claimed_at = None;
        }
        stale_ids
    }

    fn status(&self) -> QueueStatus {
        self.status_filtered(None)
    }

    fn status_in(&self, group: &HashSet<String>) -> QueueStatus {
        self.status_filtered(Some(group))
    }

    fn get_task(&self, id: &str) -> Option<QueuedTask> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tasks.get(id).cloned()
    }

    fn get_instance_tasks(&self, worker_id: &str) -> Vec<QueuedTask> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .tasks
            .values()
            .filter(|t| t.claimed_by == worker_id)
            .cloned()
            .collect()
    }

    fn is_complete(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .tasks
            .values()
            .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed))
    }

    fn task_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.order.clone()
    }
}
