//! Error taxonomy for the execution engine (see spec §7).
//!
//! Every domain error carries a stable variant name so callers can match on
//! kind without string comparison, plus a [`CoreError::is_retriable`]
//! classification the retry layer uses to decide whether to requeue or fail
//! a task outright.

use thiserror::Error;

/// Errors produced by the task queue and its decorators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid transition for task {task_id}: cannot {operation} while status is {status}")]
    InvalidTransition {
        task_id: String,
        operation: String,
        status: String,
    },

    #[error("task {0} is not awaiting approval")]
    NotAwaitingApproval(String),

    #[error("dependency cycle detected involving tasks: {0}")]
    DependencyCycle(String),

    #[error("task {task} depends on unknown task {dependency}")]
    DependencyMissing { task: String, dependency: String },

    #[error("worker sentinel malformed: {0}")]
    SentinelMalformed(String),
}

impl CoreError {
    /// Whether the retry layer should treat this error as transient (worth
    /// another attempt) versus terminal (fail the task/session outright).
    ///
    /// `TaskNotFound` and `InvalidTransition` are programming/race errors,
    /// not retriable by re-attempting the same operation. Plan-load errors
    /// (`DependencyCycle`, `DependencyMissing`) are always terminal: they
    /// reject the plan before any task runs. `SentinelMalformed` is terminal
    /// for that attempt but the owning task may still be retried by the
    /// retry layer's own policy, not by reinterpreting this error.
    pub fn is_retriable(&self) -> bool {
        false
    }
}
