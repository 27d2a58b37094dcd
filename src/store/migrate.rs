use serde::Serialize;

use crate::config::{Config, EngineKind};
use crate::error::{CleoError, Result};
use crate::paths::CleoPaths;
use crate::store::engine::{StorageEngine, open_engine};
use crate::store::{atomic, backup, lock};

/// Pre-flight inspection for storage migration. `needed` flags a
/// project whose configuration and on-disk state disagree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preflight {
    pub from: EngineKind,
    pub to: EngineKind,
    pub task_count: usize,
    pub archive_count: usize,
    pub session_count: usize,
    pub needed: bool,
    pub reason: String,
}

pub fn preflight(paths: &CleoPaths, config: &Config, to: EngineKind) -> Result<Preflight> {
    let from = config.storage.engine.unwrap_or(EngineKind::Json);
    let source = open_engine(paths, config)?;

    let task_count = source.load_todo()?.tasks.len();
    let archive_count = source.load_archive()?.tasks.len();
    let session_count = source.load_sessions()?.sessions.len();

    let (needed, reason) = if from == to {
        if config.storage.engine.is_none() {
            (
                true,
                format!("storage.engine is unset; pinning explicit '{to}'"),
            )
        } else if to == EngineKind::Sqlite && !paths.sqlite_db().exists() {
            (
                true,
                "config selects sqlite but the database file is missing".to_string(),
            )
        } else {
            (false, format!("already on '{to}'"))
        }
    } else {
        (true, format!("engine change {from} -> {to}"))
    };

    Ok(Preflight {
        from,
        to,
        task_count,
        archive_count,
        session_count,
        needed,
        reason,
    })
}

/// Counts copied per aggregate, verified against the source before the
/// config is rewritten.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub from: EngineKind,
    pub to: EngineKind,
    pub tasks_migrated: usize,
    pub archived_migrated: usize,
    pub sessions_migrated: usize,
    pub backup_dir: String,
}

/// Stream every aggregate from the current engine into `to`, verify the
/// counts match, then rewrite `config.storage.engine`. The source data
/// is snapshotted first and never deleted.
pub fn migrate(paths: &CleoPaths, config: &Config, to: EngineKind) -> Result<MigrationReport> {
    let from = config.storage.engine.unwrap_or(EngineKind::Json);

    let locks = [
        paths.todo_lock(),
        paths.archive_lock(),
        paths.sessions_lock(),
        paths.config_lock(),
    ];
    lock::with_multi_lock(&locks, || {
        let backup_dir = backup::snapshot(paths.cleo_dir())?;

        let source = open_engine(paths, config)?;
        let todo = source.load_todo()?;
        let archive = source.load_archive()?;
        let sessions = source.load_sessions()?;

        let mut target_config = config.clone();
        target_config.storage.engine = Some(to);
        let target = open_engine(paths, &target_config)?;

        // Each save runs inside one transaction per aggregate (sqlite)
        // or one atomic rename per aggregate (json).
        target.save_todo(&todo)?;
        target.save_archive(&archive)?;
        target.save_sessions(&sessions)?;

        verify_counts(&*target, todo.tasks.len(), archive.tasks.len(), sessions.sessions.len())?;

        atomic::write_json_atomic(&paths.config_file(), &target_config)?;

        Ok(MigrationReport {
            from,
            to,
            tasks_migrated: todo.tasks.len(),
            archived_migrated: archive.tasks.len(),
            sessions_migrated: sessions.sessions.len(),
            backup_dir: backup_dir.display().to_string(),
        })
    })
}

fn verify_counts(
    target: &dyn StorageEngine,
    tasks: usize,
    archived: usize,
    sessions: usize,
) -> Result<()> {
    let got_tasks = target.load_todo()?.tasks.len();
    let got_archived = target.load_archive()?.tasks.len();
    let got_sessions = target.load_sessions()?.sessions.len();

    if (got_tasks, got_archived, got_sessions) != (tasks, archived, sessions) {
        return Err(CleoError::ValidationError(format!(
            "migration count mismatch: tasks {got_tasks}/{tasks}, archive {got_archived}/{archived}, sessions {got_sessions}/{sessions}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Status, Task};
    use crate::project::{ArchiveFile, TodoFile};
    use crate::session::{Session, SessionFile, SessionScope};
    use chrono::Utc;
    use tempfile::tempdir;

    fn seeded_project(dir: &std::path::Path) -> (CleoPaths, Config) {
        let paths = CleoPaths::new(dir);
        std::fs::create_dir_all(paths.cleo_dir()).unwrap();
        let config = Config::default();

        let now = Utc::now();
        let engine = open_engine(&paths, &config).unwrap();

        let mut todo = TodoFile::empty(now);
        for id in 1..=15 {
            todo.tasks.push(Task::new(id, format!("task-{id}"), now));
        }
        todo.refresh_meta(now);
        engine.save_todo(&todo).unwrap();

        let mut archive = ArchiveFile::empty(now);
        for id in 16..=20 {
            let mut t = Task::new(id, format!("archived-{id}"), now);
            t.status = Status::Done;
            t.archived_at = Some(now);
            archive.tasks.push(t);
        }
        archive.refresh_meta(now);
        engine.save_archive(&archive).unwrap();

        let mut sessions = SessionFile::empty(now);
        for n in 0..3 {
            sessions
                .sessions
                .push(Session::new(format!("s{n}"), SessionScope::Global, now));
        }
        engine.save_sessions(&sessions).unwrap();

        (paths, config)
    }

    #[test]
    fn preflight_reports_counts_and_reason() {
        let dir = tempdir().unwrap();
        let (paths, config) = seeded_project(dir.path());

        let report = preflight(&paths, &config, EngineKind::Sqlite).unwrap();
        assert_eq!(report.from, EngineKind::Json);
        assert_eq!(report.task_count, 15);
        assert_eq!(report.archive_count, 5);
        assert_eq!(report.session_count, 3);
        assert!(report.needed);
    }

    #[test]
    fn preflight_flags_unset_engine_even_without_change() {
        let dir = tempdir().unwrap();
        let (paths, config) = seeded_project(dir.path());
        let report = preflight(&paths, &config, EngineKind::Json).unwrap();
        assert!(report.needed);
        assert!(report.reason.contains("unset"));
    }

    #[test]
    fn migrate_to_sqlite_matches_counts_and_rewrites_config() {
        let dir = tempdir().unwrap();
        let (paths, config) = seeded_project(dir.path());

        let report = migrate(&paths, &config, EngineKind::Sqlite).unwrap();
        assert_eq!(report.tasks_migrated, 15);
        assert_eq!(report.archived_migrated, 5);
        assert_eq!(report.sessions_migrated, 3);

        let rewritten: Config = atomic::read_json(&paths.config_file()).unwrap();
        assert_eq!(rewritten.storage.engine, Some(EngineKind::Sqlite));

        let target = open_engine(&paths, &rewritten).unwrap();
        assert_eq!(target.load_todo().unwrap().tasks.len(), 15);
        assert_eq!(target.load_archive().unwrap().tasks.len(), 5);
        assert_eq!(target.load_sessions().unwrap().sessions.len(), 3);
    }

    #[test]
    fn migrate_snapshots_source_first() {
        let dir = tempdir().unwrap();
        let (paths, config) = seeded_project(dir.path());

        migrate(&paths, &config, EngineKind::Sqlite).unwrap();
        let snapshots = backup::list_snapshots(paths.cleo_dir()).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].join("todo.json").exists());
    }
}
