//! Shared test fixtures for gator integration tests.
//!
//! Replaces the reference orchestrator's shared-Postgres-container helper:
//! this system's durability layer is flat JSON files, so tests only need a
//! scratch directory and a way to build small [`PlanSpec`]s without typing
//! out every field by hand.

use std::path::PathBuf;

use gator_db::models::{Complexity, PlanSpec, PlannedTask};

/// A temp directory standing in for a session root, cleaned up on drop.
pub struct TempSessionRoot {
    dir: tempfile::TempDir,
}

impl TempSessionRoot {
    pub fn new() -> Self {
        Self {
            dir: tempfile::TempDir::new().expect("failed to create temp session root"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

impl Default for TempSessionRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a [`PlannedTask`] with sensible defaults, overriding only what the
/// test cares about.
pub fn task(id: &str) -> PlannedTask {
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

/// Same as [`task`], but flagged `requires_approval`.
pub fn gated_task(id: &str) -> PlannedTask {
    PlannedTask {
        requires_approval: true,
        ..task(id)
    }
}

/// Same as [`task`], with a dependency list.
pub fn task_with_deps(id: &str, deps: &[&str]) -> PlannedTask {
    PlannedTask {
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        ..task(id)
    }
}

/// Build a minimal [`PlanSpec`] from a list of tasks. `execution_order` is
/// left empty (callers that exercise group-cursor logic should set it
/// explicitly).
pub fn plan_with(id: &str, tasks: Vec<PlannedTask>) -> PlanSpec {
    PlanSpec {
        id: id.to_owned(),
        objective: format!("test objective for {id}"),
        summary: String::new(),
        tasks,
        dependency_graph: std::collections::HashMap::new(),
        execution_order: Vec::new(),
        insights: Vec::new(),
        constraints: Vec::new(),
        created_at: chrono::Utc::now(),
    }
}

/// A one-task plan, the most common fixture shape.
pub fn single_task_plan(task_id: &str) -> PlanSpec {
    plan_with("plan-single", vec![task(task_id)])
}

/// Same as [`plan_with`], but with an explicit `execution_order`, for tests
/// that exercise group-cursor / group-scoping behavior.
pub fn plan_with_groups(id: &str, tasks: Vec<PlannedTask>, execution_order: Vec<Vec<String>>) -> PlanSpec {
    PlanSpec {
        execution_order,
        ..plan_with(id, tasks)
    }
}

/// Render a worker completion sentinel JSON body, for tests that write
/// `.task-complete.json` directly instead of going through
/// `gator_core::sentinel`.
pub fn task_complete_sentinel(task_id: &str, status: &str, commits: u32) -> String {
    format!(
        r#"{{"task_id":"{task_id}","status":"{status}","summary":"","files_modified":[],"notes":"","issues":[],"suggestions":[],"dependencies":[],"commits":{commits}}}"#
    )
}
