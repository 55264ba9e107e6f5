//! Durable checkpoint storage for a [`Session`].
//!
//! Sessions are persisted as a single JSON file per session, rewritten
//! atomically (write-to-temp then rename) on every mutation so a crash
//! mid-write never leaves a corrupt checkpoint on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::models::Session;

/// Name of the checkpoint file within a session's directory.
pub const CHECKPOINT_FILE_NAME: &str = "session.json";

/// Resolve the on-disk directory for a given session under `root`.
pub fn session_dir(root: &Path, session_id: &str) -> PathBuf {
    root.join(session_id)
}

/// Resolve the checkpoint file path for a given session under `root`.
pub fn checkpoint_path(root: &Path, session_id: &str) -> PathBuf {
    session_dir(root, session_id).join(CHECKPOINT_FILE_NAME)
}

/// Write `session`'s checkpoint to `root/<session_id>/session.json`.
///
/// Creates the session directory if it does not exist. Writes to a sibling
/// temp file first, then renames it into place, so readers never observe a
/// partially-written checkpoint.
pub fn save_checkpoint(root: &Path, session: &Session) -> Result<()> {
    let dir = session_dir(root, &session.session_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create session directory {}", dir.display()))?;

    let final_path = checkpoint_path(root, &session.session_id);
    let tmp_path = dir.join(format!(".session.{}.tmp", Uuid::new_v4()));

    let contents =
        serde_json::to_vec_pretty(session).context("failed to serialize session checkpoint")?;

    std::fs::write(&tmp_path, &contents)
        .with_context(|| format!("failed to write temp checkpoint {}", tmp_path.display()))?;

    std::fs::rename(&tmp_path, &final_path).with_context(|| {
        format!(
            "failed to rename checkpoint into place at {}",
            final_path.display()
        )
    })?;

    Ok(())
}

/// Load a session checkpoint previously written by [`save_checkpoint`].
pub fn load_checkpoint(root: &Path, session_id: &str) -> Result<Session> {
    let path = checkpoint_path(root, session_id);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read checkpoint at {}", path.display()))?;
    let session: Session =
        serde_json::from_str(&contents).context("failed to parse session checkpoint")?;
    Ok(session)
}

/// Delete a session's directory (explicit teardown).
pub fn delete_session(root: &Path, session_id: &str) -> Result<()> {
    let dir = session_dir(root, session_id);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("failed to remove session directory {}", dir.display()))?;
    }
    Ok(())
}

/// List session ids with a checkpoint present under `root`.
pub fn list_sessions(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("failed to read session root {}", root.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        if checkpoint_path(root, &id).exists() {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Phase, PlanSpec, Session};
    use chrono::Utc;
    use std::collections::HashMap;

    fn fixture_session(id: &str) -> Session {
        let now = Utc::now();
        Session {
            session_id: id.to_string(),
            phase: Phase::Executing,
            plan: PlanSpec {
                id: "plan-1".to_string(),
                objective: "do the thing".to_string(),
                summary: String::new(),
                tasks: Vec::new(),
                dependency_graph: HashMap::new(),
                execution_order: Vec::new(),
                insights: Vec::new(),
                constraints: Vec::new(),
                created_at: now,
            },
            tasks: HashMap::new(),
            assignments: HashMap::new(),
            completed_task_ids: Vec::new(),
            failed_task_ids: Vec::new(),
            group_cursor: 0,
            retry_states: HashMap::new(),
            pending_approvals: HashMap::new(),
            group_decision: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let session = fixture_session("sess-1");

        save_checkpoint(tmp.path(), &session).unwrap();
        let loaded = load_checkpoint(tmp.path(), "sess-1").unwrap();

        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.plan.id, session.plan.id);
    }

    #[test]
    fn save_overwrites_existing_checkpoint() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut session = fixture_session("sess-1");
        save_checkpoint(tmp.path(), &session).unwrap();

        session.phase = Phase::Complete;
        save_checkpoint(tmp.path(), &session).unwrap();

        let loaded = load_checkpoint(tmp.path(), "sess-1").unwrap();
        assert_eq!(loaded.phase, Phase::Complete);
    }

    #[test]
    fn load_missing_checkpoint_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(load_checkpoint(tmp.path(), "nope").is_err());
    }

    #[test]
    fn delete_session_removes_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let session = fixture_session("sess-1");
        save_checkpoint(tmp.path(), &session).unwrap();

        delete_session(tmp.path(), "sess-1").unwrap();
        assert!(!session_dir(tmp.path(), "sess-1").exists());
    }

    #[test]
    fn list_sessions_returns_sorted_ids() {
        let tmp = tempfile::TempDir::new().unwrap();
        save_checkpoint(tmp.path(), &fixture_session("b-session")).unwrap();
        save_checkpoint(tmp.path(), &fixture_session("a-session")).unwrap();

        let ids = list_sessions(tmp.path()).unwrap();
        assert_eq!(ids, vec!["a-session".to_string(), "b-session".to_string()]);
    }

    #[test]
    fn list_sessions_on_missing_root_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("does-not-exist");
        assert!(list_sessions(&missing).unwrap().is_empty());
    }
}
