//! Wraps [`TaskQueue`], publishing events on every successful mutation
//! (spec §4.3). Publication always happens after the underlying mutation has
//! released its lock.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gator_db::models::{QueueStatus, QueuedTask, Session};

use crate::bus::{Event, EventBus};
use crate::error::CoreError;
use crate::queue::{TaskQueue, TaskQueueOps};

pub struct EventQueueDecorator {
    inner: TaskQueue,
    bus: Arc<EventBus>,
}

impl EventQueueDecorator {
    pub fn new(inner: TaskQueue, bus: Arc<EventBus>) -> Self {
        Self { inner, bus }
    }

    fn publish_depth_changed(&self) {
        let s = self.inner.status();
        self.bus.publish(Event::QueueDepthChanged {
            pending: s.pending,
            claimed: s.claimed,
            running: s.running,
            completed: s.completed,
            failed: s.failed,
            total: s.total,
        });
    }

    pub fn save_state(&self, root: &Path, session: &mut Session) -> Result<(), anyhow::Error> {
        self.inner.save_state(root, session)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

impl TaskQueueOps for EventQueueDecorator {
    fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedTask>, CoreError> {
        let claimed = self.inner.claim_next(worker_id)?;
        if let Some(task) = &claimed {
            self.bus.publish(Event::TaskClaimed {
                task_id: task.id().to_owned(),
                worker_id: worker_id.to_owned(),
            });
            self.publish_depth_changed();
        }
        Ok(claimed)
    }

    fn claim_next_in(&self, worker_id: &str, group: &HashSet<String>) -> Result<Option<QueuedTask>, CoreError> {
        let claimed = self.inner.claim_next_in(worker_id, group)?;
        if let Some(task) = &claimed {
            self.bus.publish(Event::TaskClaimed {
                task_id: task.id().to_owned(),
                worker_id: worker_id.to_owned(),
            });
            self.publish_depth_changed();
        }
        Ok(claimed)
    }

    fn mark_running(&self, task_id: &str) -> Result<(), CoreError> {
        self.inner.mark_running(task_id)?;
        let worker_id = self
            .inner
            .get_task(task_id)
            .map(|t| t.claimed_by)
            .unwrap_or_default();
        self.bus.publish(Event::TaskStarted {
            task_id: task_id.to_owned(),
            worker_id,
        });
        self.publish_depth_changed();
        Ok(())
    }

    fn complete(&self, task_id: &str) -> Result<Vec<String>, CoreError> {
        let worker_id = self
            .inner
            .get_task(task_id)
            .map(|t| t.claimed_by)
            .unwrap_or_default();
        let unblocked = self.inner.complete(task_id)?;
        self.bus.publish(Event::TaskCompleted {
            task_id: task_id.to_owned(),
            worker_id,
            success: true,
        });
        for dep_id in &unblocked {
            self.bus.publish(Event::TaskBlocked {
                task_id: dep_id.clone(),
                blocked_by: Vec::new(),
                message: format!("unblocked by completion of {task_id}"),
            });
        }
        self.publish_depth_changed();
        Ok(unblocked)
    }

    fn fail(&self, task_id: &str, reason: &str) -> Result<(), CoreError> {
        let worker_id = self
            .inner
            .get_task(task_id)
            .map(|t| t.claimed_by)
            .unwrap_or_default();
        self.inner.fail(task_id, reason)?;
        self.bus.publish(Event::TaskFailed {
            task_id: task_id.to_owned(),
            worker_id,
            reason: reason.to_owned(),
        });
        self.publish_depth_changed();
        Ok(())
    }

    fn release(&self, task_id: &str, reason: &str) -> Result<(), CoreError> {
        self.inner.release(task_id, reason)?;
        self.publish_depth_changed();
        Ok(())
    }

    fn requeue_failed(&self, task_id: &str) -> Result<(), CoreError> {
        self.inner.requeue_failed(task_id)?;
        self.publish_depth_changed();
        Ok(())
    }

    fn claim_stale_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let released = self.inner.claim_stale_before(cutoff);
        if !released.is_empty() {
            self.publish_depth_changed();
        }
        released
    }

    fn status(&self) -> QueueStatus {
        self.inner.status()
    }

    fn status_in(&self, group: &HashSet<String>) -> QueueStatus {
        self.inner.status_in(group)
    }

    fn get_task(&self, id: &str) -> Option<QueuedTask> {
        self.inner.get_task(id)
    }

    fn get_instance_tasks(&self, worker_id: &str) -> Vec<QueuedTask> {
        self.inner.get_instance_tasks(worker_id)
    }

    fn is_complete(&self) -> bool {
        self.inner.is_complete()
    }

    fn task_ids(&self) -> Vec<String> {
        self.inner.task_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gator_db::models::{Complexity, PlanSpec, PlannedTask};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn plan_with(tasks: Vec<PlannedTask>) -> PlanSpec {
        PlanSpec {
            id: "plan-1".into(),
            objective: "test".into(),
            summary: String::new(),
            tasks,
            dependency_graph: HashMap::new(),
            execution_order: Vec::new(),
            insights: Vec::new(),
            constraints: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn planned(id: &str) -> PlannedTask {
        PlannedTask {
            id: id.to_owned(),
            title: id.to_owned(),
            description: String::new(),
            files: Vec::new(),
            dependencies: Vec::new(),
            priority: 0,
            complexity: Complexity::Low,
            requires_approval: false,
            source_url: None,
        }
    }

    #[test]
    fn claim_next_publishes_claimed_and_depth_changed() {
        let bus = Arc::new(EventBus::new());
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let kinds2 = kinds.clone();
        bus.subscribe_all(move |env| kinds2.lock().unwrap().push(env.event.kind()));

        let queue = TaskQueue::from_plan(&plan_with(vec![planned("t1")]));
        let decorated = EventQueueDecorator::new(queue, bus);
        decorated.claim_next("w1").unwrap();

        let kinds = kinds.lock().unwrap();
        assert_eq!(*kinds, vec!["task_claimed", "queue_depth_changed"]);
    }

    #[test]
    fn failed_operation_publishes_nothing() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(Mutex::new(0));
        let count2 = count.clone();
        bus.subscribe_all(move |_| *count2.lock().unwrap() += 1);

        let queue = TaskQueue::from_plan(&plan_with(vec![planned("t1")]));
        let decorated = EventQueueDecorator::new(queue, bus);
        assert!(decorated.mark_running("t1").is_err());

        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn complete_publishes_task_completed_before_blocked_resolution() {
        let bus = Arc::new(EventBus::new());
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let kinds2 = kinds.clone();
        bus.subscribe_all(move |env| kinds2.lock().unwrap().push(env.event.kind()));

        let mut t2 = planned("t2");
        t2.dependencies = vec!["t1".to_string()];
        let queue = TaskQueue::from_plan(&plan_with(vec![planned("t1"), t2]));
        let decorated = EventQueueDecorator::new(queue, bus);

        decorated.claim_next("w1").unwrap();
        decorated.mark_running("t1").unwrap();
        decorated.complete("t1").unwrap();

        let kinds = kinds.lock().unwrap();
        let completed_pos = kinds.iter().position(|k| *k == "task_completed").unwrap();
        let blocked_pos = kinds.iter().position(|k| *k == "task_blocked").unwrap();
        assert!(completed_pos < blocked_pos);
    }
}
