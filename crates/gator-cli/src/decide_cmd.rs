//! `gator decide` command: resolve a paused group (spec §4.5's group-decision
//! hook) and persist the outcome so the next `gator resume` can proceed.

use anyhow::{bail, Context, Result};
use gator_core::coordinator::resolve_group_decision;
use gator_core::queue::TaskQueueOps;
use gator_core::session::SessionHandle;
use gator_db::models::{GroupDecision, GroupDecisionState, Phase};

use crate::config::GatorConfig;

pub fn run_decide(session_id: &str, decision: GroupDecision, config: &GatorConfig) -> Result<()> {
    let mut session = SessionHandle::resume(
        config.db_config.session_root.clone(),
        session_id,
        config.policy,
    )
    .with_context(|| format!("failed to resume session {session_id}"))?;

    let GroupDecisionState::AwaitingDecision { failed_tasks, .. } = session.group_decision.clone()
    else {
        bail!("session {session_id} has no group awaiting a decision");
    };

    session.group_decision = resolve_group_decision(&session.group_decision, decision);

    match decision {
        GroupDecision::Continue => {
            session.group_cursor += 1;
            session.group_decision = GroupDecisionState::NotNeeded;
            println!("Session {session_id}: continuing past the failed tasks ({}).", failed_tasks.join(", "));
        }
        GroupDecision::Abort => {
            session.set_phase(Phase::Failed);
            println!("Session {session_id}: aborted.");
        }
        GroupDecision::RetryFailed => {
            for task_id in &failed_tasks {
                session
                    .gate
                    .requeue_failed(task_id)
                    .with_context(|| format!("failed to requeue task {task_id}"))?;
            }
            session.group_decision = GroupDecisionState::NotNeeded;
            println!("Session {session_id}: requeued {} failed task(s) for retry.", failed_tasks.len());
        }
    }

    session.checkpoint()?;
    println!("Run `gator resume {session_id}` to continue.");
    Ok(())
}
