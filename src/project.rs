use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CleoError, Result};
use crate::model::Task;

pub const SCHEMA_VERSION: u32 = 2;
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Active,
    Completed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,
    pub order: u32,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Phase {
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        Self {
            name: name.into(),
            order,
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseTransitionKind {
    Started,
    Completed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    pub phase: String,
    pub transition: PhaseTransitionKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_phase: Option<String>,
    pub task_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    #[serde(default)]
    pub name: String,
    /// Phases kept sorted by `order`; iteration order is phase order.
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_history: Vec<PhaseTransition>,
}

impl ProjectMeta {
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn phase_mut(&mut self, name: &str) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.name == name)
    }

    /// Phases in `order` ascending; ties broken by name for stability.
    pub fn phases_in_order(&self) -> Vec<&Phase> {
        let mut out: Vec<&Phase> = self.phases.iter().collect();
        out.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        out
    }

    pub fn active_phases(&self) -> Vec<&Phase> {
        self.phases_in_order()
            .into_iter()
            .filter(|p| p.status == PhaseStatus::Active)
            .collect()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Focus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub schema_version: u32,
    pub checksum: String,
    pub config_version: u32,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            checksum: String::new(),
            config_version: CONFIG_VERSION,
        }
    }
}

/// Aggregate root for live project state, persisted as `todo.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoFile {
    #[serde(rename = "_meta")]
    pub meta: Meta,
    #[serde(default)]
    pub project: ProjectMeta,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub focus: Focus,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TodoFile {
    pub fn empty(now: DateTime<Utc>) -> Self {
        let mut todo = Self {
            meta: Meta::default(),
            project: ProjectMeta::default(),
            last_updated: now,
            focus: Focus::default(),
            tasks: Vec::new(),
        };
        todo.meta.checksum = compute_checksum(&todo.tasks);
        todo
    }

    pub fn task(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: u64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn require_task(&self, id: u64) -> Result<&Task> {
        self.task(id)
            .ok_or_else(|| CleoError::TaskNotFound(crate::model::format_task_id(id)))
    }

    pub fn require_task_mut(&mut self, id: u64) -> Result<&mut Task> {
        if self.task(id).is_none() {
            return Err(CleoError::TaskNotFound(crate::model::format_task_id(id)));
        }
        Ok(self.task_mut(id).unwrap())
    }

    pub fn max_task_id(&self) -> u64 {
        self.tasks.iter().map(|t| t.id).max().unwrap_or(0)
    }

    /// Restamp checksum and lastUpdated. Every persisted write that
    /// changes tasks must pass through here.
    pub fn refresh_meta(&mut self, now: DateTime<Utc>) {
        self.meta.schema_version = SCHEMA_VERSION;
        self.meta.checksum = compute_checksum(&self.tasks);
        self.last_updated = now;
    }
}

/// Archive counterpart of the TodoFile, persisted as `todo-archive.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveFile {
    #[serde(rename = "_meta")]
    pub meta: Meta,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl ArchiveFile {
    pub fn empty(now: DateTime<Utc>) -> Self {
        let mut archive = Self {
            meta: Meta::default(),
            last_updated: now,
            tasks: Vec::new(),
        };
        archive.meta.checksum = compute_checksum(&archive.tasks);
        archive
    }

    pub fn max_task_id(&self) -> u64 {
        self.tasks.iter().map(|t| t.id).max().unwrap_or(0)
    }

    pub fn refresh_meta(&mut self, now: DateTime<Utc>) {
        self.meta.checksum = compute_checksum(&self.tasks);
        self.last_updated = now;
    }
}

/// Deterministic digest of a task list. Serialization order is the list
/// order, so any reordering or edit changes the checksum.
pub fn compute_checksum(tasks: &[Task]) -> String {
    let payload = serde_json::to_string(tasks).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
