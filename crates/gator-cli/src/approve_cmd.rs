//! `gator approve`/`gator reject`: resolve a single task parked behind the
//! approval gate (spec §4.3) and persist the result.

use anyhow::{Context, Result};
use gator_core::session::SessionHandle;

use crate::config::GatorConfig;

pub fn run_approve(session_id: &str, task_id: &str, config: &GatorConfig) -> Result<()> {
    let session = SessionHandle::resume(
        config.db_config.session_root.clone(),
        session_id,
        config.policy,
    )
    .with_context(|| format!("failed to resume session {session_id}"))?;

    session
        .gate
        .approve(task_id)
        .with_context(|| format!("failed to approve task {task_id}"))?;

    session.checkpoint()?;
    println!("Approved {task_id} in session {session_id}.");
    Ok(())
}

pub fn run_reject(session_id: &str, task_id: &str, reason: &str, config: &GatorConfig) -> Result<()> {
    let session = SessionHandle::resume(
        config.db_config.session_root.clone(),
        session_id,
        config.policy,
    )
    .with_context(|| format!("failed to resume session {session_id}"))?;

    session
        .gate
        .reject(task_id, reason)
        .with_context(|| format!("failed to reject task {task_id}"))?;

    session.checkpoint()?;
    println!("Rejected {task_id} in session {session_id}: {reason}");
    Ok(())
}
