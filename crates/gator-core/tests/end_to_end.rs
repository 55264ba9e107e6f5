//! End-to-end scenarios for the decorator stack (spec §8).

use std::sync::{Arc, Mutex};

use gator_core::queue::TaskQueueOps;
use gator_core::retry::{RetryPolicy, SentinelOutcome};
use gator_core::session::SessionHandle;
use gator_core::sentinel::TaskSentinel;
use gator_db::models::TaskStatus;
use gator_test_utils::{gated_task, plan_with, task, task_with_deps, TempSessionRoot};

fn lenient_policy() -> RetryPolicy {
    RetryPolicy {
        require_verified_commits: false,
        max_task_retries: 3,
    }
}

fn sentinel(task_id: &str, status: &str, commits: u32) -> TaskSentinel {
    TaskSentinel::parse(&gator_test_utils::task_complete_sentinel(task_id, status, commits))
        .expect("fixture sentinel is well-formed")
}

#[test]
fn two_independent_tasks_complete_concurrently() {
    let root = TempSessionRoot::new();
    let plan = plan_with("p1", vec![task("t1"), task("t2")]);
    let session = SessionHandle::start(plan, root.path(), lenient_policy());

    let claimed: Vec<String> = Vec::new();
    let claimed = Arc::new(Mutex::new(claimed));
    let completed = Arc::new(Mutex::new(Vec::new()));
    {
        let claimed = claimed.clone();
        let completed = completed.clone();
        session.bus.subscribe_all(move |envelope| match &envelope.event {
            gator_core::bus::Event::TaskClaimed { task_id, .. } => {
                claimed.lock().unwrap().push(task_id.clone());
            }
            gator_core::bus::Event::TaskCompleted { task_id, .. } => {
                completed.lock().unwrap().push(task_id.clone());
            }
            _ => {}
        });
    }

    let w1 = session.gate.claim_next("worker-1").unwrap().unwrap();
    let w2 = session.gate.claim_next("worker-2").unwrap().unwrap();
    assert_ne!(w1.id(), w2.id());

    session.gate.mark_running(w1.id()).unwrap();
    session.gate.mark_running(w2.id()).unwrap();

    let outcome1 = session.retry.apply_sentinel(&sentinel(w1.id(), "complete", 1)).unwrap();
    let outcome2 = session.retry.apply_sentinel(&sentinel(w2.id(), "complete", 1)).unwrap();
    assert!(matches!(outcome1, SentinelOutcome::Completed { .. }));
    assert!(matches!(outcome2, SentinelOutcome::Completed { .. }));

    assert!(session.gate.is_complete());
    assert_eq!(claimed.lock().unwrap().len(), 2);
    assert_eq!(completed.lock().unwrap().len(), 2);
}

#[test]
fn approval_gated_task_runs_after_approve() {
    let root = TempSessionRoot::new();
    let plan = plan_with("p1", vec![gated_task("t1")]);
    let session = SessionHandle::start(plan, root.path(), lenient_policy());

    let t1 = session.gate.claim_next("worker-1").unwrap().unwrap();
    session.gate.mark_running(t1.id()).unwrap();

    let status = session.gate.status();
    assert_eq!(status.awaiting_approval, 1);
    assert_eq!(status.claimed, 0);

    session.gate.approve("t1").unwrap();
    assert_eq!(session.gate.get_task("t1").unwrap().status, TaskStatus::Running);

    session.retry.apply_sentinel(&sentinel("t1", "complete", 1)).unwrap();
    assert_eq!(session.gate.get_task("t1").unwrap().status, TaskStatus::Completed);
}

#[test]
fn rejecting_a_gated_task_fails_it_with_reason() {
    let root = TempSessionRoot::new();
    let plan = plan_with("p1", vec![gated_task("t1")]);
    let session = SessionHandle::start(plan, root.path(), lenient_policy());

    let t1 = session.gate.claim_next("worker-1").unwrap().unwrap();
    session.gate.mark_running(t1.id()).unwrap();
    session.gate.reject("t1", "risky").unwrap();

    let task = session.gate.get_task("t1").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_context, "risky");
    assert!(session.gate.pending_approvals().is_empty());
}

#[test]
fn stale_claim_is_recovered_and_not_left_pending_approval() {
    let root = TempSessionRoot::new();
    let plan = plan_with("p1", vec![gated_task("t1")]);
    let session = SessionHandle::start(plan, root.path(), lenient_policy());

    let t1 = session.gate.claim_next("worker-1").unwrap().unwrap();
    session.gate.mark_running(t1.id()).unwrap();
    assert_eq!(session.gate.status().awaiting_approval, 1);

    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    let stale = session.gate.claim_stale_before(cutoff);
    assert_eq!(stale, vec!["t1".to_string()]);
    assert_eq!(session.gate.get_task("t1").unwrap().status, TaskStatus::Pending);
    assert!(session.gate.pending_approvals().is_empty());
}

#[test]
fn dependency_chain_unblocks_only_after_completion() {
    let root = TempSessionRoot::new();
    let plan = plan_with("p1", vec![task("t1"), task_with_deps("t2", &["t1"])]);
    let session = SessionHandle::start(plan, root.path(), lenient_policy());

    // t2 cannot be claimed yet: its dependency hasn't completed.
    let first = session.gate.claim_next("worker-1").unwrap().unwrap();
    assert_eq!(first.id(), "t1");
    assert!(session.gate.claim_next("worker-2").unwrap().is_none());

    session.gate.mark_running("t1").unwrap();
    session.retry.apply_sentinel(&sentinel("t1", "complete", 1)).unwrap();

    let second = session.gate.claim_next("worker-2").unwrap().unwrap();
    assert_eq!(second.id(), "t2");
}

#[test]
fn zero_commit_completions_retry_then_fail_after_max_attempts() {
    let root = TempSessionRoot::new();
    let plan = plan_with("p1", vec![task("t1")]);
    let policy = RetryPolicy {
        require_verified_commits: true,
        max_task_retries: 3,
    };
    let session = SessionHandle::start(plan, root.path(), policy);

    for attempt in 0..3 {
        let claimed = session.gate.claim_next("worker-1").unwrap().unwrap();
        session.gate.mark_running(claimed.id()).unwrap();
        let outcome = session
            .retry
            .apply_sentinel(&sentinel("t1", "complete", 0))
            .unwrap();
        assert_eq!(outcome, SentinelOutcome::Released, "attempt {attempt} should release, not fail");
        assert_eq!(session.gate.get_task("t1").unwrap().status, TaskStatus::Pending);
    }

    // Fourth zero-commit completion exhausts max_task_retries.
    let claimed = session.gate.claim_next("worker-1").unwrap().unwrap();
    session.gate.mark_running(claimed.id()).unwrap();
    let outcome = session.retry.apply_sentinel(&sentinel("t1", "complete", 0)).unwrap();
    match outcome {
        SentinelOutcome::Failed { reason } => assert!(reason.contains("no commits")),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(session.gate.get_task("t1").unwrap().status, TaskStatus::Failed);
}
