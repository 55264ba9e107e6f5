//! Coordinator loop (spec §4.6): the session's control plane. Dispatches
//! claimable tasks to workers, drives a group through to completion, and
//! reacts to worker completion sentinels via the retry & verification layer.
//!
//! The spawn/lifecycle mechanics of a worker are out of scope (spec §1); the
//! coordinator only needs a [`WorkerDispatcher`] that starts a worker and
//! eventually resolves with the sentinel it reported.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gator_db::models::{GroupDecision, GroupDecisionState, QueuedTask, TaskStatus};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{Event, EventBus};
use crate::gate::ApprovalGate;
use crate::queue::TaskQueueOps;
use crate::retry::{RetryVerificationLayer, SentinelOutcome};
use crate::sentinel::TaskSentinel;

pub type WorkerFuture = Pin<Box<dyn std::future::Future<Output = TaskSentinel> + Send>>;

/// Starts a worker for a claimed task. The returned future resolves once the
/// worker has written its completion sentinel; how that happens (subprocess,
/// container, remote job) is entirely the dispatcher's business.
pub trait WorkerDispatcher: Send + Sync {
    fn dispatch(&self, task: QueuedTask, worker_id: String) -> WorkerFuture;
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_parallel: usize,
    pub stale_threshold: chrono::Duration,
    pub task_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            stale_threshold: chrono::Duration::minutes(10),
            task_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Outcome of running the dispatch loop for the current group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Every task in the group completed successfully.
    Completed,
    /// The group finished with a mixture of successes and failures; the
    /// coordinator must not advance `group_cursor` until an external
    /// `GroupDecision` is recorded (spec §9, resolved open question).
    AwaitingDecision { failed_tasks: Vec<String> },
    /// An external cancel signal stopped dispatch mid-group.
    Cancelled,
}

struct InFlight {
    worker_id: String,
    started_at: Instant,
}

/// Drives one group of `execution_order` to completion, dispatching tasks
/// through the Gate and folding sentinels back in via the retry layer.
pub struct CoordinatorLoop {
    gate: Arc<ApprovalGate>,
    retry: Arc<RetryVerificationLayer>,
    bus: Arc<EventBus>,
    dispatcher: Arc<dyn WorkerDispatcher>,
    config: CoordinatorConfig,
}

struct WorkerDone {
    task_id: String,
    sentinel: TaskSentinel,
}

impl CoordinatorLoop {
    pub fn new(
        gate: Arc<ApprovalGate>,
        retry: Arc<RetryVerificationLayer>,
        bus: Arc<EventBus>,
        dispatcher: Arc<dyn WorkerDispatcher>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            gate,
            retry,
            bus,
            dispatcher,
            config,
        }
    }

    /// Run the dispatch loop until the current group is fully resolved or a
    /// cancellation is observed. `group_tasks` is the set of task ids that
    /// make up `execution_order[group_index]`; dispatch, settlement, and
    /// failure accounting are all bounded to this set so a later group's
    /// task is never claimed just because its dependencies happen to
    /// resolve early (spec §9).
    pub async fn run_group(
        &self,
        group_index: usize,
        group_tasks: &[String],
        cancel: &CancellationToken,
    ) -> GroupOutcome {
        let group: HashSet<String> = group_tasks.iter().cloned().collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let (tx, mut rx) = mpsc::channel::<WorkerDone>(self.config.max_parallel * 2);
        let mut in_flight: HashMap<String, InFlight> = HashMap::new();
        // Claimed tasks parked behind an approval gate: (task, worker_id),
        // dispatched to a worker only once `mark_running` has actually taken
        // effect (spec Q3: a task becomes `running` only via an explicit
        // mark, which for gated tasks happens only after approval).
        let mut awaiting_dispatch: Vec<(QueuedTask, String)> = Vec::new();
        let mut poll = tokio::time::interval(self.config.poll_interval);

        loop {
            if cancel.is_cancelled() {
                self.release_in_flight(&in_flight, "cancelled");
                for (task, _) in &awaiting_dispatch {
                    let _ = self.gate.release(task.id(), "cancelled");
                }
                self.bus.publish(Event::SessionComplete {
                    success: false,
                    summary: "cancelled".to_owned(),
                });
                return GroupOutcome::Cancelled;
            }

            while let Ok(done) = rx.try_recv() {
                in_flight.remove(&done.task_id);
                self.fold_sentinel(done);
            }

            self.check_timeouts(&mut in_flight);

            let stale_cutoff = Utc::now() - self.config.stale_threshold;
            let stale = self.gate.claim_stale_before(stale_cutoff);
            for id in &stale {
                in_flight.remove(id);
                awaiting_dispatch.retain(|(t, _)| t.id() != id);
            }

            self.dispatch_approved(&mut awaiting_dispatch, &tx, &semaphore);

            let worker_id = format!("worker-{}", Uuid::new_v4());
            match self.gate.claim_next_in(&worker_id, &group) {
                Ok(Some(task)) => {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    in_flight.insert(
                        task.id().to_owned(),
                        InFlight {
                            worker_id: worker_id.clone(),
                            started_at: Instant::now(),
                        },
                    );

                    // Delegates to EventQueueDecorator::mark_running (which
                    // publishes TaskStarted) for non-gated tasks, or parks
                    // the task in the Gate's pending map and publishes
                    // TaskAwaitingApproval for gated ones.
                    let requires_approval = task.task.requires_approval;
                    if let Err(e) = self.gate.mark_running(task.id()) {
                        tracing::warn!(task_id = %task.id(), error = %e, "failed to mark freshly claimed task running");
                    }

                    if requires_approval {
                        drop(permit);
                        awaiting_dispatch.push((task, worker_id));
                    } else {
                        let task_id = task.id().to_owned();
                        let tx = tx.clone();
                        let fut = self.dispatcher.dispatch(task, worker_id);
                        tokio::spawn(async move {
                            let sentinel = fut.await;
                            drop(permit);
                            let _ = tx.send(WorkerDone { task_id, sentinel }).await;
                        });
                    }
                    continue;
                }
                Ok(None) => {}
                Err(_) => {}
            }

            // Settled: nothing running, nothing claimable right now, and
            // nothing parked behind the gate. A task whose dependency failed
            // stays `pending` forever, so this is deliberately independent of
            // `status.pending == 0` (that would never fire once a dependency
            // chain is permanently blocked).
            if self.group_is_settled(&group) && in_flight.is_empty() && awaiting_dispatch.is_empty() {
                break;
            }

            if in_flight.is_empty() && awaiting_dispatch.is_empty() {
                // Nothing claimable and nothing running: the group may be
                // waiting on approvals or is genuinely stuck; yield briefly.
                tokio::select! {
                    _ = poll.tick() => {}
                    _ = cancel.cancelled() => continue,
                }
            } else {
                tokio::select! {
                    done = rx.recv() => {
                        if let Some(done) = done {
                            in_flight.remove(&done.task_id);
                            self.fold_sentinel(done);
                        }
                    }
                    _ = poll.tick() => {}
                    _ = cancel.cancelled() => continue,
                }
            }
        }

        self.finish_group(group_index, group_tasks, &group)
    }

    /// Spawn workers for tasks that were parked behind the gate and have
    /// since transitioned to `running` (approved). Tasks still awaiting
    /// approval, or blocked on a free semaphore permit, stay parked.
    fn dispatch_approved(
        &self,
        awaiting: &mut Vec<(QueuedTask, String)>,
        tx: &mpsc::Sender<WorkerDone>,
        semaphore: &Arc<Semaphore>,
    ) {
        let mut remaining = Vec::new();
        for (task, worker_id) in awaiting.drain(..) {
            let current_status = self.gate.get_task(task.id()).map(|t| t.status);
            match current_status {
                Some(TaskStatus::Running) => match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => {
                        let task_id = task.id().to_owned();
                        let tx = tx.clone();
                        let fut = self.dispatcher.dispatch(task, worker_id);
                        tokio::spawn(async move {
                            let sentinel = fut.await;
                            drop(permit);
                            let _ = tx.send(WorkerDone { task_id, sentinel }).await;
                        });
                    }
                    Err(_) => remaining.push((task, worker_id)),
                },
                // Rejected (failed) or released back to pending: drop from
                // the parked list, the queue already reflects the outcome.
                Some(TaskStatus::Failed) | Some(TaskStatus::Pending) | None => {}
                _ => remaining.push((task, worker_id)),
            }
        }
        *awaiting = remaining;
    }

    fn fold_sentinel(&self, done: WorkerDone) {
        match self.retry.apply_sentinel(&done.sentinel) {
            Ok(SentinelOutcome::Completed { .. }) => {}
            Ok(SentinelOutcome::Released) => {}
            Ok(SentinelOutcome::Failed { .. }) => {}
            Err(e) => {
                tracing::warn!(task_id = %done.task_id, error = %e, "failed to fold sentinel");
            }
        }
    }

    fn check_timeouts(&self, in_flight: &mut HashMap<String, InFlight>) {
        let mut timed_out = Vec::new();
        for (task_id, info) in in_flight.iter() {
            if info.started_at.elapsed() > self.config.task_timeout {
                timed_out.push(task_id.clone());
            }
        }
        for task_id in timed_out {
            in_flight.remove(&task_id);
            tracing::warn!(task_id = %task_id, "task exceeded wall-clock timeout, releasing");
            let _ = self.gate.release(&task_id, "task timed out");
        }
    }

    fn release_in_flight(&self, in_flight: &HashMap<String, InFlight>, reason: &str) {
        for task_id in in_flight.keys() {
            let _ = self.gate.release(task_id, reason);
        }
    }

    /// Nothing is mid-flight within `group`. Combined with a `claim_next_in`
    /// miss and an empty `in_flight`/`awaiting_dispatch`, this means the
    /// group has genuinely run out of work to hand out, whether because
    /// every task in it reached a terminal state or because the remaining
    /// pending tasks depend on a task that failed and can never unblock
    /// them.
    fn group_is_settled(&self, group: &HashSet<String>) -> bool {
        let status = self.gate.status_in(group);
        status.claimed == 0 && status.running == 0 && status.awaiting_approval == 0
    }

    fn finish_group(&self, group_index: usize, group_tasks: &[String], group: &HashSet<String>) -> GroupOutcome {
        let status = self.gate.status_in(group);
        if status.failed == 0 {
            self.bus.publish(Event::GroupCompleted { group_index });
            GroupOutcome::Completed
        } else {
            let failed_tasks: Vec<String> = group_tasks
                .iter()
                .filter(|id| matches!(self.gate.get_task(id), Some(t) if t.status == TaskStatus::Failed))
                .cloned()
                .collect();
            self.retry.emit_group_partial(group_index, failed_tasks.clone());
            GroupOutcome::AwaitingDecision { failed_tasks }
        }
    }
}

/// Resolve a paused group given an operator's decision (spec §4.5's
/// group-decision hook; the coordinator itself never guesses).
pub fn resolve_group_decision(
    state: &GroupDecisionState,
    decision: GroupDecision,
) -> GroupDecisionState {
    match state {
        GroupDecisionState::AwaitingDecision { group_index, .. } => GroupDecisionState::Decided {
            group_index: *group_index,
            decision,
        },
        other => other.clone(),
    }
}
