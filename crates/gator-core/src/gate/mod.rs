//! Wraps the event-queue decorator, intercepting the claimed→running
//! transition for tasks flagged `requires_approval` (spec §4.4).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use gator_db::models::{QueueStatus, QueuedTask, TaskStatus};

use crate::bus::{Event, EventBus};
use crate::error::CoreError;
use crate::queue::TaskQueueOps;
use crate::queue::event_queue::EventQueueDecorator;

/// `(requires_approval, exists)` for a task id, derived from the plan.
pub type RequiresApprovalLookup = Arc<dyn Fn(&str) -> (bool, bool) + Send + Sync>;

pub struct ApprovalGate {
    inner: EventQueueDecorator,
    bus: Arc<EventBus>,
    /// task_id -> worker_id, for tasks the gate is holding in the logical
    /// `awaiting_approval` state. The underlying queue still reports these
    /// as `claimed`; this map is the source of truth for the overlay.
    pending: Mutex<std::collections::HashMap<String, String>>,
    requires_approval_lookup: RequiresApprovalLookup,
}

impl ApprovalGate {
    pub fn new(inner: EventQueueDecorator, lookup: RequiresApprovalLookup) -> Self {
        let bus = inner.bus().clone();
        Self {
            inner,
            bus,
            pending: Mutex::new(std::collections::HashMap::new()),
            requires_approval_lookup: lookup,
        }
    }

    /// Resolve a pending approval-gated task by accepting it: delegates to
    /// the underlying `mark_running`.
    pub fn approve(&self, task_id: &str) -> Result<(), CoreError> {
        self.remove_if_pending(task_id)?;
        let result = self.inner.mark_running(task_id);
        if result.is_err() {
            // Restore the pending entry; the underlying transition did not
            // happen so the gate must keep holding the task.
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(task_id.to_owned(), self.claimed_by(task_id));
        }
        result
    }

    /// Resolve a pending approval-gated task by rejecting it: delegates to
    /// the underlying `fail`.
    pub fn reject(&self, task_id: &str, reason: &str) -> Result<(), CoreError> {
        self.remove_if_pending(task_id)?;
        self.inner.fail(task_id, reason)
    }

    fn remove_if_pending(&self, task_id: &str) -> Result<(), CoreError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.remove(task_id).is_none() {
            return Err(CoreError::NotAwaitingApproval(task_id.to_owned()));
        }
        Ok(())
    }

    fn claimed_by(&self, task_id: &str) -> String {
        self.inner
            .get_task(task_id)
            .map(|t| t.claimed_by)
            .unwrap_or_default()
    }

    fn is_pending(&self, task_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(task_id)
    }

    /// Snapshot of the gate's pending-approvals map (task_id -> worker_id),
    /// for checkpointing into [`gator_db::models::Session::pending_approvals`].
    pub fn pending_approvals(&self) -> std::collections::HashMap<String, String> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The task as the underlying queue sees it, bypassing the
    /// `awaiting_approval` status overlay. Used when checkpointing, so the
    /// persisted status matches Invariant Q5 ("pending-approval set is a
    /// subset of tasks whose underlying status is `claimed`").
    pub fn get_task_raw(&self, id: &str) -> Option<QueuedTask> {
        self.inner.get_task(id)
    }

    /// Seed the pending-approvals map directly, without going through
    /// `mark_running` (used by session resume to restore gate state from a
    /// checkpoint without re-running the claimed->awaiting_approval
    /// transition logic or re-publishing events for it).
    pub fn restore_pending(&self, pending: std::collections::HashMap<String, String>) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = pending;
    }
}

impl TaskQueueOps for ApprovalGate {
    fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedTask>, CoreError> {
        self.inner.claim_next(worker_id)
    }

    fn claim_next_in(&self, worker_id: &str, group: &HashSet<String>) -> Result<Option<QueuedTask>, CoreError> {
        self.inner.claim_next_in(worker_id, group)
    }

    fn mark_running(&self, task_id: &str) -> Result<(), CoreError> {
        let (requires_approval, exists) = (self.requires_approval_lookup)(task_id);
        if !exists {
            return Err(CoreError::TaskNotFound(task_id.to_owned()));
        }
        if !requires_approval {
            return self.inner.mark_running(task_id);
        }

        let task = self
            .inner
            .get_task(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_owned()))?;
        if task.status != TaskStatus::Claimed {
            return Err(CoreError::InvalidTransition {
                task_id: task_id.to_owned(),
                operation: "mark_running".to_owned(),
                status: task.status.to_string(),
            });
        }

        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(task_id.to_owned(), task.claimed_by.clone());
        }

        self.bus.publish(Event::TaskAwaitingApproval {
            task_id: task_id.to_owned(),
            worker_id: task.claimed_by,
        });
        let s = self.status();
        self.bus.publish(Event::QueueDepthChanged {
            pending: s.pending,
            claimed: s.claimed,
            running: s.running,
            completed: s.completed,
            failed: s.failed,
            total: s.total,
        });
        Ok(())
    }

    fn complete(&self, task_id: &str) -> Result<Vec<String>, CoreError> {
        self.inner.complete(task_id)
    }

    fn fail(&self, task_id: &str, reason: &str) -> Result<(), CoreError> {
        self.inner.fail(task_id, reason)
    }

    fn release(&self, task_id: &str, reason: &str) -> Result<(), CoreError> {
        self.inner.release(task_id, reason)?;
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
        Ok(())
    }

    fn claim_stale_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let released = self.inner.claim_stale_before(cutoff);
        if !released.is_empty() {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            for id in &released {
                pending.remove(id);
            }
        }
        released
    }

    fn status(&self) -> QueueStatus {
        let mut status = self.inner.status();
        let pending_count = self.pending.lock().unwrap_or_else(|e| e.into_inner()).len();
        status.awaiting_approval += pending_count;
        status.claimed = status.claimed.saturating_sub(pending_count);
        status
    }

    fn status_in(&self, group: &HashSet<String>) -> QueueStatus {
        let mut status = self.inner.status_in(group);
        let pending_count = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .filter(|id| group.contains(id.as_str()))
            .count();
        status.awaiting_approval += pending_count;
        status.claimed = status.claimed.saturating_sub(pending_count);
        status
    }

    fn get_task(&self, id: &str) -> Option<QueuedTask> {
        let mut task = self.inner.get_task(id)?;
        if self.is_pending(id) {
            task.status = TaskStatus::AwaitingApproval;
        }
        Some(task)
    }

    fn get_instance_tasks(&self, worker_id: &str) -> Vec<QueuedTask> {
        self.inner
            .get_instance_tasks(worker_id)
            .into_iter()
            .map(|mut t| {
                if self.is_pending(t.id()) {
                    t.status = TaskStatus::AwaitingApproval;
                }
                t
            })
            .collect()
    }

    fn is_complete(&self) -> bool {
        self.inner.is_complete()
    }

    fn task_ids(&self) -> Vec<String> {
        self.inner.task_ids()
    }

    fn requeue_failed(&self, task_id: &str) -> Result<(), CoreError> {
        self.inner.requeue_failed(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueue;
    use gator_db::models::{Complexity, PlanSpec, PlannedTask};
    use std::collections::HashMap;

    fn planned(id: &str, requires_approval: bool) -> PlannedTask {
        PlannedTask {
            id: id.to_owned(),
            title: id.to_owned(),
            description: String::new(),
            files: Vec::new(),
            dependencies: Vec::new(),
            priority: 0,
            complexity: Complexity::Low,
            requires_approval,
            source_url: None,
        }
    }

    fn gate_with(tasks: Vec<PlannedTask>) -> ApprovalGate {
        let lookup_tasks: HashMap<String, bool> = tasks
            .iter()
            .map(|t| (t.id.clone(), t.requires_approval))
            .collect();
        let plan = PlanSpec {
            id: "plan-1".into(),
            objective: "test".into(),
            summary: String::new(),
            tasks,
            dependency_graph: HashMap::new(),
            execution_order: Vec::new(),
            insights: Vec::new(),
            constraints: Vec::new(),
            created_at: Utc::now(),
        };
        let queue = TaskQueue::from_plan(&plan);
        let bus = Arc::new(EventBus::new());
        let decorated = EventQueueDecorator::new(queue, bus);
        let lookup: RequiresApprovalLookup = Arc::new(move |id: &str| {
            match lookup_tasks.get(id) {
                Some(requires) => (*requires, true),
                None => (false, false),
            }
        });
        ApprovalGate::new(decorated, lookup)
    }

    #[test]
    fn non_gated_task_runs_immediately() {
        let gate = gate_with(vec![planned("t1", false)]);
        gate.claim_next("w1").unwrap();
        gate.mark_running("t1").unwrap();
        assert_eq!(gate.get_task("t1").unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn gated_task_suspends_at_awaiting_approval() {
        let gate = gate_with(vec![planned("t1", true)]);
        gate.claim_next("w1").unwrap();
        gate.mark_running("t1").unwrap();

        let status = gate.status();
        assert_eq!(status.awaiting_approval, 1);
        assert_eq!(status.claimed, 0);
        assert_eq!(
            gate.get_task("t1").unwrap().status,
            TaskStatus::AwaitingApproval
        );
    }

    #[test]
    fn approve_transitions_to_running() {
        let gate = gate_with(vec![planned("t1", true)]);
        gate.claim_next("w1").unwrap();
        gate.mark_running("t1").unwrap();
        gate.approve("t1").unwrap();
        assert_eq!(gate.get_task("t1").unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn approve_twice_is_not_awaiting_approval() {
        let gate = gate_with(vec![planned("t1", true)]);
        gate.claim_next("w1").unwrap();
        gate.mark_running("t1").unwrap();
        gate.approve("t1").unwrap();
        assert!(matches!(
            gate.approve("t1"),
            Err(CoreError::NotAwaitingApproval(_))
        ));
    }

    #[test]
    fn reject_fails_task_and_clears_pending() {
        let gate = gate_with(vec![planned("t1", true)]);
        gate.claim_next("w1").unwrap();
        gate.mark_running("t1").unwrap();
        gate.reject("t1", "risky").unwrap();

        let task = gate.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure_context, "risky");
        assert_eq!(gate.status().awaiting_approval, 0);
    }

    #[test]
    fn release_clears_pending_entry() {
        let gate = gate_with(vec![planned("t1", true)]);
        gate.claim_next("w1").unwrap();
        gate.mark_running("t1").unwrap();
        gate.release("t1", "worker died").unwrap();

        assert_eq!(gate.status().awaiting_approval, 0);
        assert!(gate.approve("t1").is_err());
    }

    #[test]
    fn stale_cleanup_clears_pending_entry() {
        let gate = gate_with(vec![planned("t1", true)]);
        gate.claim_next("w1").unwrap();
        gate.mark_running("t1").unwrap();

        let future = Utc::now() + chrono::Duration::seconds(60);
        gate.claim_stale_before(future);

        assert_eq!(gate.status().awaiting_approval, 0);
        assert!(gate.approve("t1").is_err());
    }

    #[test]
    fn unknown_task_is_task_not_found() {
        let gate = gate_with(vec![planned("t1", false)]);
        assert!(matches!(
            gate.mark_running("nope"),
            Err(CoreError::TaskNotFound(_))
        ));
    }
}
