//! Configuration file management for gator.
//!
//! Provides a TOML config file at `~/.config/gator/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use gator_core::coordinator::CoordinatorConfig;
use gator_core::retry::RetryPolicy;
use gator_db::config::DbConfig;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub policy: PolicySection,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SessionSection {
    pub root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicySection {
    pub max_parallel: Option<usize>,
    pub stale_threshold_secs: Option<i64>,
    pub task_timeout_secs: Option<u64>,
    pub max_task_retries: Option<u32>,
    pub require_verified_commits: Option<bool>,
    pub worker_command: Option<Vec<String>>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            max_parallel: None,
            stale_threshold_secs: None,
            task_timeout_secs: None,
            max_task_retries: None,
            require_verified_commits: None,
            worker_command: None,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the gator config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/gator` or `~/.config/gator`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("gator");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("gator")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file. Returns `None` if it does not exist.
pub fn load_config() -> Option<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&contents).ok()
}

pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use by every subcommand.
#[derive(Debug)]
pub struct GatorConfig {
    pub db_config: DbConfig,
    pub coordinator: CoordinatorConfig,
    pub policy: RetryPolicy,
    pub worker_command: Vec<String>,
}

impl GatorConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    pub fn resolve(cli_session_root: Option<&str>) -> Result<Self> {
        let file_config = load_config();

        let session_root = if let Some(root) = cli_session_root {
            PathBuf::from(root)
        } else if let Ok(root) = std::env::var("GATOR_SESSION_ROOT") {
            PathBuf::from(root)
        } else if let Some(root) = file_config.as_ref().and_then(|c| c.session.root.clone()) {
            PathBuf::from(root)
        } else {
            DbConfig::from_env().session_root
        };
        let db_config = DbConfig::new(session_root);

        let policy_section = file_config.map(|c| c.policy).unwrap_or_default();

        let max_parallel = env_or("GATOR_MAX_PARALLEL")
            .or(policy_section.max_parallel)
            .unwrap_or(4);
        let stale_threshold_secs = env_or_i64("GATOR_STALE_THRESHOLD_SECS")
            .or(policy_section.stale_threshold_secs)
            .unwrap_or(600);
        let task_timeout_secs = env_or_u64("GATOR_TASK_TIMEOUT_SECS")
            .or(policy_section.task_timeout_secs)
            .unwrap_or(3600);
        let max_task_retries = env_or("GATOR_MAX_TASK_RETRIES")
            .or(policy_section.max_task_retries)
            .unwrap_or(3);
        let require_verified_commits = std::env::var("GATOR_REQUIRE_VERIFIED_COMMITS")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(policy_section.require_verified_commits)
            .unwrap_or(true);
        let worker_command = std::env::var("GATOR_WORKER_COMMAND")
            .ok()
            .map(|cmd| cmd.split_whitespace().map(str::to_owned).collect())
            .or(policy_section.worker_command)
            .unwrap_or_else(|| vec!["gator-worker".to_string()]);

        Ok(Self {
            db_config,
            coordinator: CoordinatorConfig {
                max_parallel,
                stale_threshold: chrono::Duration::seconds(stale_threshold_secs),
                task_timeout: Duration::from_secs(task_timeout_secs),
                poll_interval: Duration::from_millis(200),
            },
            policy: RetryPolicy {
                require_verified_commits,
                max_task_retries,
            },
            worker_command,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_or_i64(key: &str) -> Option<i64> {
    env_or(key)
}

fn env_or_u64(key: &str) -> Option<u64> {
    env_or(key)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("GATOR_SESSION_ROOT") };
        unsafe { std::env::remove_var("GATOR_MAX_PARALLEL") };

        let config = GatorConfig::resolve(None).unwrap();
        assert_eq!(config.coordinator.max_parallel, 4);
        assert_eq!(config.policy.max_task_retries, 3);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env() {
        let _lock = lock_env();
        unsafe { std::env::set_var("GATOR_SESSION_ROOT", "/tmp/env-root") };

        let config = GatorConfig::resolve(Some("/tmp/cli-root")).unwrap();
        assert_eq!(config.db_config.session_root, PathBuf::from("/tmp/cli-root"));

        unsafe { std::env::remove_var("GATOR_SESSION_ROOT") };
    }

    #[test]
    fn resolve_with_env_var_used_when_no_cli_flag() {
        let _lock = lock_env();
        unsafe { std::env::set_var("GATOR_SESSION_ROOT", "/tmp/env-root") };

        let config = GatorConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.session_root, PathBuf::from("/tmp/env-root"));

        unsafe { std::env::remove_var("GATOR_SESSION_ROOT") };
    }

    #[test]
    fn resolve_parses_max_parallel_from_env() {
        let _lock = lock_env();
        unsafe { std::env::set_var("GATOR_MAX_PARALLEL", "8") };

        let config = GatorConfig::resolve(None).unwrap();
        assert_eq!(config.coordinator.max_parallel, 8);

        unsafe { std::env::remove_var("GATOR_MAX_PARALLEL") };
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("gator/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
