use crate::config::{Config, EngineKind};
use crate::error::Result;
use crate::paths::CleoPaths;
use crate::project::{ArchiveFile, TodoFile};
use crate::session::SessionFile;

/// The only seam through which higher layers reach persistence. A read
/// without a backing file returns an empty aggregate; creation happens
/// lazily on first write.
pub trait StorageEngine {
    fn kind(&self) -> EngineKind;
    fn load_todo(&self) -> Result<TodoFile>;
    fn save_todo(&self, todo: &TodoFile) -> Result<()>;
    fn load_archive(&self) -> Result<ArchiveFile>;
    fn save_archive(&self, archive: &ArchiveFile) -> Result<()>;
    fn load_sessions(&self) -> Result<SessionFile>;
    fn save_sessions(&self, sessions: &SessionFile) -> Result<()>;
}

/// Engine selection: explicit config wins; otherwise JSON. A configured
/// sqlite engine with a missing database is still opened (the engine
/// creates it), so upgrade preflight can flag the mismatch separately.
pub fn open_engine(paths: &CleoPaths, config: &Config) -> Result<Box<dyn StorageEngine>> {
    match config.storage.engine.unwrap_or(EngineKind::Json) {
        EngineKind::Json => Ok(Box::new(crate::store::json::JsonEngine::new(paths.clone()))),
        EngineKind::Sqlite => Ok(Box::new(crate::store::sqlite::SqliteEngine::open(
            &paths.sqlite_db(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn default_engine_is_json() {
        let paths = CleoPaths::new(Path::new("/tmp/nowhere"));
        let config = Config::default();
        let engine = open_engine(&paths, &config).unwrap();
        assert_eq!(engine.kind(), EngineKind::Json);
    }

    #[test]
    fn explicit_sqlite_selection_respected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CleoPaths::new(dir.path());
        std::fs::create_dir_all(paths.cleo_dir()).unwrap();
        let mut config = Config::default();
        config.storage.engine = Some(EngineKind::Sqlite);
        let engine = open_engine(&paths, &config).unwrap();
        assert_eq!(engine.kind(), EngineKind::Sqlite);
    }
}
