//! Retry & verification layer (spec §4.5): sits between the Coordinator and
//! the Gate, folding a worker's completion sentinel back into the queue
//! under the "task must produce commits" policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gator_db::models::TaskRetryState;

use crate::bus::{Event, EventBus};
use crate::error::CoreError;
use crate::gate::ApprovalGate;
use crate::queue::TaskQueueOps;
use crate::sentinel::{SentinelStatus, TaskSentinel};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub require_verified_commits: bool,
    pub max_task_retries: u32,
}

/// What happened to a task after its sentinel was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentinelOutcome {
    Completed { unblocked: Vec<String> },
    Released,
    Failed { reason: String },
}

pub struct RetryVerificationLayer {
    gate: Arc<ApprovalGate>,
    bus: Arc<EventBus>,
    policy: RetryPolicy,
    retry_states: Mutex<HashMap<String, TaskRetryState>>,
}

impl RetryVerificationLayer {
    pub fn new(gate: Arc<ApprovalGate>, bus: Arc<EventBus>, policy: RetryPolicy) -> Self {
        Self {
            gate,
            bus,
            policy,
            retry_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn retry_state(&self, task_id: &str) -> Option<TaskRetryState> {
        self.retry_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned()
    }

    pub fn retry_states_snapshot(&self) -> HashMap<String, TaskRetryState> {
        self.retry_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Apply a worker's task sentinel, transitioning the queue via the gate.
    pub fn apply_sentinel(&self, sentinel: &TaskSentinel) -> Result<SentinelOutcome, CoreError> {
        match sentinel.status {
            SentinelStatus::Blocked => {
                let reason = if sentinel.issues.is_empty() {
                    sentinel.notes()
                } else {
                    sentinel.issues.join("; ")
                };
                self.gate.fail(&sentinel.task_id, &reason)?;
                Ok(SentinelOutcome::Failed { reason })
            }
            SentinelStatus::Failed => {
                let reason = sentinel.notes();
                self.gate.fail(&sentinel.task_id, &reason)?;
                Ok(SentinelOutcome::Failed { reason })
            }
            SentinelStatus::Complete => self.apply_complete(sentinel),
        }
    }

    fn apply_complete(&self, sentinel: &TaskSentinel) -> Result<SentinelOutcome, CoreError> {
        if !self.policy.require_verified_commits || sentinel.commits >= 1 {
            let unblocked = self.gate.complete(&sentinel.task_id)?;
            return Ok(SentinelOutcome::Completed { unblocked });
        }

        let mut states = self.retry_states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states
            .entry(sentinel.task_id.clone())
            .or_insert_with(|| TaskRetryState::new(&sentinel.task_id, self.policy.max_task_retries));
        state.retry_count += 1;
        state.commit_counts.push(sentinel.commits);

        if state.retry_count <= state.max_retries {
            state.last_error = "no commits produced".to_owned();
            drop(states);
            self.gate.release(&sentinel.task_id, "no commits produced")?;
            Ok(SentinelOutcome::Released)
        } else {
            let reason = format!(
                "no commits produced after {} attempts",
                state.retry_count
            );
            state.last_error = reason.clone();
            drop(states);
            self.gate.fail(&sentinel.task_id, &reason)?;
            Ok(SentinelOutcome::Failed { reason })
        }
    }

    /// Notify subscribers that a finished group has a mixture of successes
    /// and failures and needs an external continue/abort/retry-failed
    /// decision before the coordinator advances the group cursor.
    pub fn emit_group_partial(&self, group_index: usize, failed_tasks: Vec<String>) {
        self.bus.publish(Event::GroupPartial {
            group_index,
            failed_tasks,
        });
    }
}
