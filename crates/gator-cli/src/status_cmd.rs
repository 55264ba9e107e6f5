//! `gator status` command: show a session's checkpoint as a textual summary
//! (the reference orchestrator's TUI dashboard is out of scope; this is the
//! plain-text view it mirrors).

use anyhow::{Context, Result};
use gator_db::store;

use crate::config::GatorConfig;

pub fn run_status(session_id: Option<&str>, config: &GatorConfig) -> Result<()> {
    match session_id {
        Some(id) => show_session(id, config),
        None => list_sessions(config),
    }
}

fn show_session(session_id: &str, config: &GatorConfig) -> Result<()> {
    let session = store::load_checkpoint(&config.db_config.session_root, session_id)
        .with_context(|| format!("session {session_id} not found"))?;

    println!("Session: {}", session.session_id);
    println!("Phase: {}", session.phase);
    println!("Plan: {} ({})", session.plan.objective, session.plan.id);
    println!("Group cursor: {}", session.group_cursor);
    println!();

    let mut statuses: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for task in session.tasks.values() {
        *statuses.entry(status_key(task.status)).or_insert(0) += 1;
    }
    println!(
        "pending={} claimed={} running={} awaiting_approval={} completed={} failed={}",
        statuses.get("pending").copied().unwrap_or(0),
        statuses.get("claimed").copied().unwrap_or(0),
        statuses.get("running").copied().unwrap_or(0),
        statuses.get("awaiting_approval").copied().unwrap_or(0),
        statuses.get("completed").copied().unwrap_or(0),
        statuses.get("failed").copied().unwrap_or(0),
    );
    println!();

    println!("Tasks:");
    for task in &session.plan.tasks {
        let queued = session.tasks.get(&task.id);
        let (icon, status) = match queued {
            Some(t) => (status_icon(t.status), t.status.to_string()),
            None => (" ", "unknown".to_string()),
        };
        println!("  [{icon}] {} ({status})", task.id);
    }

    if let gator_db::models::GroupDecisionState::AwaitingDecision {
        group_index,
        failed_tasks,
    } = &session.group_decision
    {
        println!();
        println!(
            "Group {group_index} is awaiting a decision ({} failed: {}).",
            failed_tasks.len(),
            failed_tasks.join(", ")
        );
    }

    Ok(())
}

fn list_sessions(config: &GatorConfig) -> Result<()> {
    let sessions = store::list_sessions(&config.db_config.session_root)?;
    if sessions.is_empty() {
        println!("No sessions found under {}", config.db_config.session_root.display());
        return Ok(());
    }

    for session_id in &sessions {
        println!("{session_id}");
    }
    Ok(())
}

fn status_key(status: gator_db::models::TaskStatus) -> &'static str {
    use gator_db::models::TaskStatus::*;
    match status {
        Pending => "pending",
        Claimed => "claimed",
        Running => "running",
        AwaitingApproval => "awaiting_approval",
        Completed => "completed",
        Failed => "failed",
    }
}

fn status_icon(status: gator_db::models::TaskStatus) -> &'static str {
    use gator_db::models::TaskStatus::*;
    match status {
        Pending => ".",
        Claimed => ">",
        Running => "*",
        AwaitingApproval => "?",
        Completed => "+",
        Failed => "!",
    }
}
