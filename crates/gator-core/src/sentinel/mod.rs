//! Worker completion sentinels (spec §6): JSON files a worker drops into its
//! working directory to report task/phase outcomes. The core only cares
//! about their presence and `status` field; everything else is opaque
//! diagnostic payload threaded through to events and checkpoints.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

pub const TASK_COMPLETE_FILE: &str = ".task-complete.json";
pub const SYNTHESIS_COMPLETE_FILE: &str = ".synthesis-complete.json";
pub const REVISION_COMPLETE_FILE: &str = ".revision-complete.json";
pub const CONSOLIDATION_COMPLETE_FILE: &str = ".consolidation-complete.json";
pub const GROUP_CONSOLIDATION_COMPLETE_FILE: &str = ".group-consolidation-complete.json";
pub const PLAN_FILE: &str = ".plan.json";

/// Outcome reported by a worker for a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelStatus {
    Complete,
    Blocked,
    Failed,
}

/// A single task's completion sentinel (`.task-complete.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSentinel {
    pub task_id: String,
    pub status: SentinelStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// Accepts either a single string or an array of strings; arrays are
    /// joined with newlines by [`normalize_notes`] at parse time.
    #[serde(default)]
    notes: Value,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Count of commits the worker produced for this task. Not part of the
    /// wire shape in §6's literal listing but required by the retry layer's
    /// "task must produce commits" policy (§4.5); workers are expected to
    /// populate it, defaulting to 0 when absent.
    #[serde(default)]
    pub commits: u32,
}

impl TaskSentinel {
    /// `notes`, normalized to a single string regardless of whether the
    /// worker wrote a string or an array (spec §6: "presence of `notes` as
    /// an array must be accepted as equivalent to the newline-joined
    /// string").
    pub fn notes(&self) -> String {
        normalize_notes(&self.notes)
    }

    pub fn parse(content: &str) -> Result<Self, CoreError> {
        serde_json::from_str(content).map_err(|e| CoreError::SentinelMalformed(e.to_string()))
    }

    pub fn read_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::SentinelMalformed(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }
}

fn normalize_notes(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// A generic opaque sentinel, used for the synthesis/revision/consolidation
/// files whose only load-bearing field is `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSentinel {
    pub status: SentinelStatus,
    #[serde(default)]
    pub summary: String,
}

impl PhaseSentinel {
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        serde_json::from_str(content).map_err(|e| CoreError::SentinelMalformed(e.to_string()))
    }

    pub fn read_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::SentinelMalformed(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }
}
