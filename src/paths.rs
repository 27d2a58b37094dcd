use std::path::{Path, PathBuf};

use crate::error::{CleoError, Result};

pub const CLEO_DIR: &str = ".cleo";

/// Canonical locations of every file the storage layer owns, rooted at
/// one project's `.cleo/` directory. Environment overrides are read
/// once at construction; hot-swapping the project mid-process is
/// unsupported.
#[derive(Debug, Clone)]
pub struct CleoPaths {
    root: PathBuf,
    cleo_dir: PathBuf,
}

impl CleoPaths {
    pub fn new(project_root: &Path) -> Self {
        Self {
            root: project_root.to_path_buf(),
            cleo_dir: project_root.join(CLEO_DIR),
        }
    }

    /// Resolve the project root: `CLEO_ROOT` when set, otherwise walk
    /// up from the current directory looking for a `.cleo/` marker.
    pub fn discover() -> Result<Self> {
        if let Ok(root) = std::env::var("CLEO_ROOT") {
            let root = PathBuf::from(root);
            if root.join(CLEO_DIR).is_dir() {
                return Ok(Self::new(&root));
            }
            return Err(CleoError::NotInitialized);
        }

        let mut dir = std::env::current_dir().map_err(CleoError::Io)?;
        loop {
            if dir.join(CLEO_DIR).is_dir() {
                return Ok(Self::new(&dir));
            }
            if !dir.pop() {
                return Err(CleoError::NotInitialized);
            }
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    pub fn cleo_dir(&self) -> &Path {
        &self.cleo_dir
    }

    pub fn todo_file(&self) -> PathBuf {
        self.cleo_dir.join("todo.json")
    }

    pub fn archive_file(&self) -> PathBuf {
        self.cleo_dir.join("todo-archive.json")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.cleo_dir.join("sessions.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.cleo_dir.join("config.json")
    }

    pub fn sequence_file(&self) -> PathBuf {
        self.cleo_dir.join(".sequence.json")
    }

    pub fn sqlite_db(&self) -> PathBuf {
        self.cleo_dir.join("cleo.db")
    }

    pub fn log_file(&self) -> PathBuf {
        self.cleo_dir.join("todo-log.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.cleo_dir.join(".backups")
    }

    pub fn operational_backups_dir(&self) -> PathBuf {
        self.cleo_dir.join("backups").join("operational")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.cleo_dir.join("metrics")
    }

    pub fn metrics_shard(&self, name: &str) -> PathBuf {
        self.metrics_dir().join(format!("{name}.jsonl"))
    }

    pub fn context_states_dir(&self) -> PathBuf {
        self.cleo_dir.join("context-states")
    }

    pub fn context_state_file(&self, session_id: &str) -> PathBuf {
        self.context_states_dir()
            .join(format!("context-state-{session_id}.json"))
    }

    pub fn context_alert_file(&self, session_id: &str) -> PathBuf {
        self.context_states_dir()
            .join(format!("context-alert-{session_id}.json"))
    }

    /// Named lock file guarding one shared resource.
    pub fn lock_file(&self, resource: &str) -> PathBuf {
        self.cleo_dir.join(format!("{resource}.lock"))
    }

    pub fn todo_lock(&self) -> PathBuf {
        self.lock_file("todo")
    }

    pub fn archive_lock(&self) -> PathBuf {
        self.lock_file("todo-archive")
    }

    pub fn sessions_lock(&self) -> PathBuf {
        self.lock_file("sessions")
    }

    pub fn sequence_lock(&self) -> PathBuf {
        self.lock_file(".sequence")
    }

    pub fn config_lock(&self) -> PathBuf {
        self.lock_file("config")
    }
}

/// Global `~/.cleo` home, overridable with `CLEO_HOME`.
pub fn cleo_home() -> PathBuf {
    if let Ok(home) = std::env::var("CLEO_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CLEO_DIR)
}

/// Session id from the environment, when the host runtime exported one.
pub fn env_session_id() -> Option<String> {
    std::env::var("CLEO_SESSION").ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_documented_tree() {
        let paths = CleoPaths::new(Path::new("/work/proj"));
        assert_eq!(paths.todo_file(), Path::new("/work/proj/.cleo/todo.json"));
        assert_eq!(
            paths.archive_file(),
            Path::new("/work/proj/.cleo/todo-archive.json")
        );
        assert_eq!(
            paths.sequence_file(),
            Path::new("/work/proj/.cleo/.sequence.json")
        );
        assert_eq!(paths.backups_dir(), Path::new("/work/proj/.cleo/.backups"));
        assert_eq!(
            paths.operational_backups_dir(),
            Path::new("/work/proj/.cleo/backups/operational")
        );
        assert_eq!(
            paths.metrics_shard("COMPLIANCE"),
            Path::new("/work/proj/.cleo/metrics/COMPLIANCE.jsonl")
        );
        assert_eq!(
            paths.context_state_file("abc"),
            Path::new("/work/proj/.cleo/context-states/context-state-abc.json")
        );
        assert_eq!(paths.todo_lock(), Path::new("/work/proj/.cleo/todo.lock"));
    }
}
