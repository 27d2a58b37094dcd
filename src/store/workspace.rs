use std::path::Path;

use chrono::Utc;

use crate::audit::AuditRecord;
use crate::config::Config;
use crate::error::{CleoError, Result};
use crate::paths::CleoPaths;
use crate::project::{ArchiveFile, TodoFile};
use crate::session::SessionFile;
use crate::store::engine::{StorageEngine, open_engine};
use crate::store::lock::{with_file_lock, with_multi_lock};
use crate::store::sequence::SequenceFile;
use crate::store::atomic;
use crate::{audit, schema};

/// Output of a mutation transform: the caller-visible value plus the
/// audit records describing what changed.
pub struct Mutation<T> {
    pub value: T,
    pub records: Vec<AuditRecord>,
}

impl<T> Mutation<T> {
    pub fn new(value: T, records: Vec<AuditRecord>) -> Self {
        Self { value, records }
    }

    pub fn single(value: T, record: AuditRecord) -> Self {
        Self {
            value,
            records: vec![record],
        }
    }
}

/// Open project handle: canonical paths, parsed config, and the
/// selected storage engine. Every mutation funnels through the same
/// pipeline: read aggregate, pure transform, invariant validation,
/// commit (atomic write + audit append). An invariant failure aborts
/// before commit, leaving disk state untouched.
pub struct Workspace {
    pub paths: CleoPaths,
    pub config: Config,
    engine: Box<dyn StorageEngine>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("paths", &self.paths)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    pub fn open(project_root: &Path) -> Result<Self> {
        let paths = CleoPaths::new(project_root);
        if !paths.cleo_dir().is_dir() {
            return Err(CleoError::NotInitialized);
        }
        let config = load_config(&paths)?;
        let engine = open_engine(&paths, &config)?;
        Ok(Self {
            paths,
            config,
            engine,
        })
    }

    pub fn discover() -> Result<Self> {
        let paths = CleoPaths::discover()?;
        Self::open(&paths.project_root().to_path_buf())
    }

    /// Create the `.cleo/` directory with empty aggregates.
    pub fn init(project_root: &Path, project_name: Option<String>) -> Result<Self> {
        let paths = CleoPaths::new(project_root);
        if paths.cleo_dir().is_dir() {
            return Err(CleoError::AlreadyInitialized);
        }
        std::fs::create_dir_all(paths.cleo_dir())?;

        let now = Utc::now();
        let mut todo = TodoFile::empty(now);
        if let Some(name) = project_name {
            todo.project.name = name;
        }
        atomic::write_json_atomic(&paths.todo_file(), &todo)?;
        atomic::write_json_atomic(&paths.config_file(), &Config::default())?;
        SequenceFile::initial().save(&paths.sequence_file())?;
        atomic::write_json_atomic(&paths.sessions_file(), &SessionFile::empty(now))?;

        Self::open(project_root)
    }

    pub fn engine(&self) -> &dyn StorageEngine {
        &*self.engine
    }

    /// Reopen the engine after a config change (storage migration).
    pub fn reload(&mut self) -> Result<()> {
        self.config = load_config(&self.paths)?;
        self.engine = open_engine(&self.paths, &self.config)?;
        Ok(())
    }

    pub fn load_todo(&self) -> Result<TodoFile> {
        self.engine.load_todo()
    }

    pub fn load_archive(&self) -> Result<ArchiveFile> {
        self.engine.load_archive()
    }

    pub fn load_sessions(&self) -> Result<SessionFile> {
        self.engine.load_sessions()
    }

    pub fn load_sequence(&self) -> Result<SequenceFile> {
        SequenceFile::load(&self.paths.sequence_file())
    }

    fn archive_ids(&self) -> Result<Vec<u64>> {
        Ok(self.load_archive()?.tasks.iter().map(|t| t.id).collect())
    }

    fn commit_todo(&self, todo: &mut TodoFile, records: &[AuditRecord]) -> Result<()> {
        let archive_ids = self.archive_ids()?;
        schema::validate_todo(todo, &archive_ids, &self.config)?;
        todo.refresh_meta(Utc::now());
        self.engine.save_todo(todo)?;
        for record in records {
            audit::append(&self.paths, record)?;
        }
        Ok(())
    }

    /// Mutate the TodoFile under its lock.
    pub fn mutate_todo<T>(
        &self,
        f: impl FnOnce(&mut TodoFile) -> Result<Mutation<T>>,
    ) -> Result<T> {
        with_file_lock(&self.paths.todo_lock(), || {
            let mut todo = self.engine.load_todo()?;
            let mutation = f(&mut todo)?;
            self.commit_todo(&mut todo, &mutation.records)?;
            Ok(mutation.value)
        })
    }

    /// Mutate the TodoFile together with the id sequence; used by
    /// operations that allocate ids. Both locks are taken in canonical
    /// order and the sequence is persisted in the same scope.
    pub fn mutate_todo_with_sequence<T>(
        &self,
        f: impl FnOnce(&mut TodoFile, &mut SequenceFile) -> Result<Mutation<T>>,
    ) -> Result<T> {
        let locks = [self.paths.todo_lock(), self.paths.sequence_lock()];
        with_multi_lock(&locks, || {
            let mut todo = self.engine.load_todo()?;
            let mut sequence = self.load_sequence()?;
            let mutation = f(&mut todo, &mut sequence)?;
            self.commit_todo(&mut todo, &mutation.records)?;
            sequence.save(&self.paths.sequence_file())?;
            Ok(mutation.value)
        })
    }

    /// Mutate live and archive aggregates in one lock scope.
    pub fn mutate_todo_and_archive<T>(
        &self,
        f: impl FnOnce(&mut TodoFile, &mut ArchiveFile) -> Result<Mutation<T>>,
    ) -> Result<T> {
        let locks = [self.paths.todo_lock(), self.paths.archive_lock()];
        with_multi_lock(&locks, || {
            let mut todo = self.engine.load_todo()?;
            let mut archive = self.engine.load_archive()?;
            let mutation = f(&mut todo, &mut archive)?;

            let archive_ids: Vec<u64> = archive.tasks.iter().map(|t| t.id).collect();
            schema::validate_todo(&todo, &archive_ids, &self.config)?;
            let now = Utc::now();
            todo.refresh_meta(now);
            archive.refresh_meta(now);
            self.engine.save_archive(&archive)?;
            self.engine.save_todo(&todo)?;
            for record in &mutation.records {
                audit::append(&self.paths, record)?;
            }
            Ok(mutation.value)
        })
    }

    /// Mutate the session aggregate under its lock.
    pub fn mutate_sessions<T>(
        &self,
        f: impl FnOnce(&mut SessionFile) -> Result<Mutation<T>>,
    ) -> Result<T> {
        with_file_lock(&self.paths.sessions_lock(), || {
            let mut sessions = self.engine.load_sessions()?;
            let mutation = f(&mut sessions)?;
            sessions.last_updated = Utc::now();
            self.engine.save_sessions(&sessions)?;
            for record in &mutation.records {
                audit::append(&self.paths, record)?;
            }
            Ok(mutation.value)
        })
    }
}

fn load_config(paths: &CleoPaths) -> Result<Config> {
    let path = paths.config_file();
    if !path.exists() {
        return Ok(Config::default());
    }
    atomic::read_json(&path)
}
