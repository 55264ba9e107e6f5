//! Durable top-level session state (spec §3's `Session`), wired to the
//! queue/gate/retry stack and checkpointed to disk on every mutation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use gator_db::models::{GroupDecisionState, Phase, PlanSpec};
use gator_db::store;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::gate::{ApprovalGate, RequiresApprovalLookup};
use crate::queue::event_queue::EventQueueDecorator;
use crate::queue::{TaskQueue, TaskQueueOps};
use crate::retry::{RetryPolicy, RetryVerificationLayer};

/// Everything the coordinator needs to drive one session: the decorator
/// stack plus the session-level fields that are not owned by the queue.
pub struct SessionHandle {
    pub session_id: String,
    pub root: PathBuf,
    pub bus: Arc<EventBus>,
    pub gate: Arc<ApprovalGate>,
    pub retry: Arc<RetryVerificationLayer>,
    pub phase: Phase,
    pub plan: PlanSpec,
    pub group_cursor: usize,
    pub completed_task_ids: Vec<String>,
    pub failed_task_ids: Vec<String>,
    pub group_decision: GroupDecisionState,
    pub created_at: chrono::DateTime<Utc>,
}

impl SessionHandle {
    /// Start a brand-new session from a validated plan.
    pub fn start(plan: PlanSpec, root: PathBuf, policy: RetryPolicy) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let queue = TaskQueue::from_plan(&plan);
        let bus = Arc::new(EventBus::new());
        let decorated = EventQueueDecorator::new(queue, bus.clone());

        let lookup_map: std::collections::HashMap<String, bool> = plan
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.requires_approval))
            .collect();
        let lookup: RequiresApprovalLookup = Arc::new(move |id: &str| match lookup_map.get(id) {
            Some(requires) => (*requires, true),
            None => (false, false),
        });
        let gate = Arc::new(ApprovalGate::new(decorated, lookup));
        let retry = Arc::new(RetryVerificationLayer::new(gate.clone(), bus.clone(), policy));

        Self {
            session_id,
            root,
            bus,
            gate,
            retry,
            phase: Phase::Executing,
            plan,
            group_cursor: 0,
            completed_task_ids: Vec::new(),
            failed_task_ids: Vec::new(),
            group_decision: GroupDecisionState::NotNeeded,
            created_at: Utc::now(),
        }
    }

    /// Reload a session from its checkpoint (spec §6's `resume`).
    pub fn resume(root: PathBuf, session_id: &str, policy: RetryPolicy) -> Result<Self> {
        let checkpoint = store::load_checkpoint(&root, session_id)
            .with_context(|| format!("failed to resume session {session_id}"))?;

        let queue = TaskQueue::from_session(&checkpoint);
        let bus = Arc::new(EventBus::new());
        let decorated = EventQueueDecorator::new(queue, bus.clone());

        let lookup_map: std::collections::HashMap<String, bool> = checkpoint
            .plan
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.requires_approval))
            .collect();
        let lookup: RequiresApprovalLookup = Arc::new(move |id: &str| match lookup_map.get(id) {
            Some(requires) => (*requires, true),
            None => (false, false),
        });
        let gate = Arc::new(ApprovalGate::new(decorated, lookup));
        gate.restore_pending(checkpoint.pending_approvals.clone());
        let retry = Arc::new(RetryVerificationLayer::new(gate.clone(), bus.clone(), policy));

        Ok(Self {
            session_id: checkpoint.session_id,
            root,
            bus,
            gate,
            retry,
            phase: checkpoint.phase,
            plan: checkpoint.plan,
            group_cursor: checkpoint.group_cursor,
            completed_task_ids: checkpoint.completed_task_ids,
            failed_task_ids: checkpoint.failed_task_ids,
            group_decision: checkpoint.group_decision,
            created_at: checkpoint.created_at,
        })
    }

    /// Atomically checkpoint the full session state to disk (spec §6).
    pub fn checkpoint(&self) -> Result<()> {
        let tasks = self
            .plan
            .tasks
            .iter()
            .filter_map(|t| self.gate.get_task_raw(&t.id).map(|qt| (t.id.clone(), qt)))
            .collect();

        let session = gator_db::models::Session {
            session_id: self.session_id.clone(),
            phase: self.phase,
            plan: self.plan.clone(),
            tasks,
            assignments: std::collections::HashMap::new(),
            completed_task_ids: self.completed_task_ids.clone(),
            failed_task_ids: self.failed_task_ids.clone(),
            group_cursor: self.group_cursor,
            retry_states: self.retry.retry_states_snapshot(),
            pending_approvals: self.gate.pending_approvals(),
            group_decision: self.group_decision.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        };
        store::save_checkpoint(&self.root, &session)
    }

    pub fn set_phase(&mut self, phase: Phase) {
        let from = self.phase;
        self.phase = phase;
        self.bus.publish(crate::bus::Event::PhaseChanged {
            from: from.to_string(),
            to: phase.to_string(),
            message: String::new(),
        });
    }
}
