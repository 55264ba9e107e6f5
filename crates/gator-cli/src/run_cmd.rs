//! `gator run` command: load a plan, start a session, and drive it to
//! completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use gator_core::bus::Event;
use gator_core::coordinator::{CoordinatorLoop, GroupOutcome};
use gator_core::plan;
use gator_core::session::SessionHandle;
use tokio_util::sync::CancellationToken;

use crate::config::GatorConfig;
use crate::dispatch::SubprocessDispatcher;

/// Process exit codes, per the CLI surface's documented contract.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_SESSION_FAILED: i32 = 1;
pub const EXIT_CANCELLED: i32 = 2;
pub const EXIT_INVALID_INPUT: i32 = 3;

pub async fn run_plan(plan_path: &str, config: &GatorConfig) -> Result<i32> {
    let content = std::fs::read_to_string(plan_path)
        .with_context(|| format!("failed to read plan file {plan_path}"))?;
    let plan = match plan::load_plan(&content) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("invalid plan: {e}");
            return Ok(EXIT_INVALID_INPUT);
        }
    };

    let session = SessionHandle::start(plan, config.db_config.session_root.clone(), config.policy);
    println!("Started session {}", session.session_id);

    subscribe_progress_logger(&session.bus);
    drive_session(session, config).await
}

pub async fn resume_session(session_id: &str, config: &GatorConfig) -> Result<i32> {
    let session = SessionHandle::resume(
        config.db_config.session_root.clone(),
        session_id,
        config.policy,
    )
    .with_context(|| format!("failed to resume session {session_id}"))?;
    println!("Resumed session {}", session.session_id);

    subscribe_progress_logger(&session.bus);
    drive_session(session, config).await
}

fn subscribe_progress_logger(bus: &Arc<gator_core::bus::EventBus>) {
    bus.subscribe_all(|envelope| match &envelope.event {
        Event::TaskClaimed { task_id, worker_id } => {
            tracing::info!(task_id = %task_id, worker_id = %worker_id, "claimed");
        }
        Event::TaskAwaitingApproval { task_id, .. } => {
            println!("Task {task_id} is awaiting approval (gator approve/reject {task_id})");
        }
        Event::TaskCompleted { task_id, .. } => {
            println!("Task {task_id} completed");
        }
        Event::TaskFailed { task_id, reason, .. } => {
            println!("Task {task_id} failed: {reason}");
        }
        Event::GroupPartial { group_index, failed_tasks } => {
            println!(
                "Group {group_index} has failures ({}); run `gator decide <session-id> <continue|abort|retry-failed>`",
                failed_tasks.join(", ")
            );
        }
        _ => {}
    });
}

async fn drive_session(mut session: SessionHandle, config: &GatorConfig) -> Result<i32> {
    let dispatcher = Arc::new(SubprocessDispatcher::new(
        config.worker_command.clone(),
        session.root.join(&session.session_id).join("work"),
        std::time::Duration::from_millis(500),
    ));
    let coordinator = CoordinatorLoop::new(
        session.gate.clone(),
        session.retry.clone(),
        session.bus.clone(),
        dispatcher,
        config.coordinator.clone(),
    );

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_signal_for_task = got_first_signal.clone();
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal_for_task.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_for_signal.cancel();
        }
    });

    let total_groups = session.plan.execution_order.len().max(1);
    while session.group_cursor < total_groups {
        // A plan with no explicit `execution_order` runs as a single
        // implicit group containing every task.
        let group_tasks: Vec<String> = if session.plan.execution_order.is_empty() {
            session.plan.tasks.iter().map(|t| t.id.clone()).collect()
        } else {
            session.plan.execution_order[session.group_cursor].clone()
        };
        let outcome = coordinator
            .run_group(session.group_cursor, &group_tasks, &cancel)
            .await;
        session.checkpoint()?;

        match outcome {
            GroupOutcome::Completed => {
                session.group_cursor += 1;
                session.checkpoint()?;
            }
            GroupOutcome::AwaitingDecision { failed_tasks } => {
                session.group_decision = gator_db::models::GroupDecisionState::AwaitingDecision {
                    group_index: session.group_cursor,
                    failed_tasks,
                };
                session.checkpoint()?;
                println!(
                    "Session {} paused awaiting a group decision. Re-run `gator resume {}` after `gator decide`.",
                    session.session_id, session.session_id
                );
                return Ok(EXIT_SESSION_FAILED);
            }
            GroupOutcome::Cancelled => {
                session.set_phase(gator_db::models::Phase::Failed);
                session.checkpoint()?;
                println!("Session {} cancelled.", session.session_id);
                return Ok(EXIT_CANCELLED);
            }
        }
    }

    session.set_phase(gator_db::models::Phase::Complete);
    session.checkpoint()?;
    session.bus.publish(Event::SessionComplete {
        success: true,
        summary: "all groups completed".to_owned(),
    });
    println!("Session {} complete.", session.session_id);
    Ok(EXIT_SUCCESS)
}
