use std::env;
use std::path::PathBuf;

/// Location of the session-checkpoint store.
///
/// Reads from the `GATOR_SESSION_ROOT` environment variable, falling back to
/// `$XDG_DATA_HOME/gator/sessions` (or `~/.local/share/gator/sessions`) when
/// unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Directory under which each session gets its own subdirectory.
    pub session_root: PathBuf,
}

impl DbConfig {
    /// Build a config from the environment.
    ///
    /// Priority: `GATOR_SESSION_ROOT` env var, then the XDG data directory.
    pub fn from_env() -> Self {
        let session_root = env::var_os("GATOR_SESSION_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_session_root);
        Self { session_root }
    }

    /// Build a config from an explicit root (useful for tests and CLI flags).
    pub fn new(session_root: impl Into<PathBuf>) -> Self {
        Self {
            session_root: session_root.into(),
        }
    }

    fn default_session_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gator")
            .join("sessions")
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
