use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, params};

use crate::config::EngineKind;
use crate::error::Result;
use crate::model::Task;
use crate::project::{ArchiveFile, TodoFile};
use crate::session::{Session, SessionFile};
use crate::store::engine::StorageEngine;

/// Embedded relational engine. Each aggregate maps to one table plus a
/// shared `meta` key/value table for document-level state; task rows
/// carry the full serialized task alongside the indexed columns.
pub struct SqliteEngine {
    conn: Connection,
}

impl SqliteEngine {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let engine = Self { conn };
        engine.create_tables()?;
        Ok(engine)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let engine = Self { conn };
        engine.create_tables()?;
        Ok(engine)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                position INTEGER NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                phase TEXT,
                parent_id INTEGER,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS archive (
                id INTEGER PRIMARY KEY,
                position INTEGER NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                archived_at TEXT
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_phase ON tasks(phase);
            CREATE INDEX IF NOT EXISTS idx_archive_status ON archive(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn read_meta(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM meta WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn read_meta_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_meta(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn tasks_from(&self, table: &str) -> Result<Vec<Task>> {
        let sql = format!("SELECT payload FROM {table} ORDER BY position");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for payload in rows {
            tasks.push(serde_json::from_str(&payload?)?);
        }
        Ok(tasks)
    }
}

impl StorageEngine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn load_todo(&self) -> Result<TodoFile> {
        let Some(mut todo) = self.read_meta_json::<TodoFile>("todo")? else {
            return Ok(TodoFile::empty(Utc::now()));
        };
        todo.tasks = self.tasks_from("tasks")?;
        Ok(todo)
    }

    fn save_todo(&self, todo: &TodoFile) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM tasks", [])?;
        for (position, task) in todo.tasks.iter().enumerate() {
            tx.execute(
                "INSERT INTO tasks (id, position, title, status, phase, parent_id, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    task.id,
                    position as i64,
                    task.title,
                    task.status.to_string(),
                    task.phase,
                    task.parent_id,
                    serde_json::to_string(task)?,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )?;
        }
        // Document-level state travels without its task list.
        let mut header = todo.clone();
        header.tasks = Vec::new();
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('todo', ?1)",
            params![serde_json::to_string(&header)?],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('todo_checksum', ?1)",
            params![todo.meta.checksum],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load_archive(&self) -> Result<ArchiveFile> {
        let Some(mut archive) = self.read_meta_json::<ArchiveFile>("archive")? else {
            return Ok(ArchiveFile::empty(Utc::now()));
        };
        archive.tasks = self.tasks_from("archive")?;
        Ok(archive)
    }

    fn save_archive(&self, archive: &ArchiveFile) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM archive", [])?;
        for (position, task) in archive.tasks.iter().enumerate() {
            tx.execute(
                "INSERT INTO archive (id, position, status, payload, archived_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    task.id,
                    position as i64,
                    task.status.to_string(),
                    serde_json::to_string(task)?,
                    task.archived_at.map(|t| t.to_rfc3339()),
                ],
            )?;
        }
        let mut header = archive.clone();
        header.tasks = Vec::new();
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('archive', ?1)",
            params![serde_json::to_string(&header)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load_sessions(&self) -> Result<SessionFile> {
        let Some(mut sessions) = self.read_meta_json::<SessionFile>("sessions")? else {
            return Ok(SessionFile::empty(Utc::now()));
        };
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM sessions ORDER BY position")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut list: Vec<Session> = Vec::new();
        for payload in rows {
            list.push(serde_json::from_str(&payload?)?);
        }
        sessions.sessions = list;
        Ok(sessions)
    }

    fn save_sessions(&self, sessions: &SessionFile) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM sessions", [])?;
        for (position, session) in sessions.sessions.iter().enumerate() {
            tx.execute(
                "INSERT INTO sessions (id, position, status, payload) VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.id,
                    position as i64,
                    session.status.to_string(),
                    serde_json::to_string(session)?,
                ],
            )?;
        }
        let mut header = sessions.clone();
        header.sessions = Vec::new();
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('sessions', ?1)",
            params![serde_json::to_string(&header)?],
        )?;
        tx.commit()?;
        Ok(())
    }
}
