use chrono::Utc;

use crate::config::EngineKind;
use crate::error::Result;
use crate::paths::CleoPaths;
use crate::project::{ArchiveFile, TodoFile};
use crate::session::SessionFile;
use crate::store::atomic;
use crate::store::backup::BackupRing;
use crate::store::engine::StorageEngine;

/// One JSON file per aggregate under `.cleo/`. Reads are full parses;
/// writes are atomic and rotate the previous contents into the ring.
pub struct JsonEngine {
    paths: CleoPaths,
    ring: BackupRing,
}

impl JsonEngine {
    pub fn new(paths: CleoPaths) -> Self {
        let ring = BackupRing::for_cleo_dir(paths.cleo_dir());
        Self { paths, ring }
    }
}

impl StorageEngine for JsonEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Json
    }

    fn load_todo(&self) -> Result<TodoFile> {
        let path = self.paths.todo_file();
        if !path.exists() {
            return Ok(TodoFile::empty(Utc::now()));
        }
        atomic::read_json(&path)
    }

    fn save_todo(&self, todo: &TodoFile) -> Result<()> {
        atomic::write_json_atomic_with_backup(&self.paths.todo_file(), todo, Some(&self.ring))
    }

    fn load_archive(&self) -> Result<ArchiveFile> {
        let path = self.paths.archive_file();
        if !path.exists() {
            return Ok(ArchiveFile::empty(Utc::now()));
        }
        atomic::read_json(&path)
    }

    fn save_archive(&self, archive: &ArchiveFile) -> Result<()> {
        atomic::write_json_atomic_with_backup(&self.paths.archive_file(), archive, Some(&self.ring))
    }

    fn load_sessions(&self) -> Result<SessionFile> {
        let path = self.paths.sessions_file();
        if !path.exists() {
            return Ok(SessionFile::empty(Utc::now()));
        }
        atomic::read_json(&path)
    }

    fn save_sessions(&self, sessions: &SessionFile) -> Result<()> {
        atomic::write_json_atomic_with_backup(
            &self.paths.sessions_file(),
            sessions,
            Some(&self.ring),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;
    use crate::session::{Session, SessionScope};
    use tempfile::tempdir;

    fn engine_in(dir: &std::path::Path) -> JsonEngine {
        let paths = CleoPaths::new(dir);
        std::fs::create_dir_all(paths.cleo_dir()).unwrap();
        JsonEngine::new(paths)
    }

    #[test]
    fn missing_files_load_as_empty_aggregates() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());
        assert!(engine.load_todo().unwrap().tasks.is_empty());
        assert!(engine.load_archive().unwrap().tasks.is_empty());
        assert!(engine.load_sessions().unwrap().sessions.is_empty());
    }

    #[test]
    fn todo_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let now = Utc::now();
        let mut todo = TodoFile::empty(now);
        todo.tasks.push(Task::new(1, "First", now));
        todo.refresh_meta(now);
        engine.save_todo(&todo).unwrap();

        let loaded = engine.load_todo().unwrap();
        assert_eq!(loaded, todo);
    }

    #[test]
    fn sessions_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let now = Utc::now();
        let mut sessions = SessionFile::empty(now);
        sessions
            .sessions
            .push(Session::new("work", SessionScope::Global, now));
        engine.save_sessions(&sessions).unwrap();

        let loaded = engine.load_sessions().unwrap();
        assert_eq!(loaded, sessions);
    }

    #[test]
    fn second_save_rotates_backup() {
        let dir = tempdir().unwrap();
        let engine = engine_in(dir.path());

        let now = Utc::now();
        let mut todo = TodoFile::empty(now);
        engine.save_todo(&todo).unwrap();
        todo.tasks.push(Task::new(1, "First", now));
        todo.refresh_meta(now);
        engine.save_todo(&todo).unwrap();

        let backup = engine
            .paths
            .cleo_dir()
            .join(".backups")
            .join("todo.json.1");
        assert!(backup.exists());
    }
}
