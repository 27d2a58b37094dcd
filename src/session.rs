use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CleoError, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Ended,
    Orphaned,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
            Self::Orphaned => write!(f, "orphaned"),
        }
    }
}

/// Either project-wide or bound to one epic's subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    Global,
    Epic(u64),
}

impl SessionScope {
    pub fn parse(input: &str) -> Result<Self> {
        if input == "global" {
            return Ok(Self::Global);
        }
        if let Some(rest) = input.strip_prefix("epic:") {
            let id = crate::model::parse_task_id(rest)?;
            return Ok(Self::Epic(id));
        }
        Err(CleoError::InvalidInput(format!(
            "invalid session scope '{input}' (expected 'global' or 'epic:<taskId>')"
        )))
    }
}

impl std::fmt::Display for SessionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Epic(id) => write!(f, "epic:{}", crate::model::format_task_id(*id)),
        }
    }
}

impl Serialize for SessionScope {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionScope {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    pub scope: SessionScope,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_task_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_note: Option<String>,
}

impl Session {
    pub fn new(name: impl Into<String>, scope: SessionScope, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            scope,
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            agent: None,
            pid: Some(std::process::id()),
            focus_task_id: None,
            end_note: None,
        }
    }
}

/// Session aggregate, persisted as `sessions.json` and shared by all
/// concurrent processes under its file lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFile {
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<String>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl SessionFile {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            last_updated: now,
            current_session_id: None,
            sessions: Vec::new(),
        }
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Resolve by full id, unique id prefix, or exact name.
    pub fn resolve(&self, selector: &str) -> Result<&Session> {
        if let Some(s) = self.session(selector) {
            return Ok(s);
        }
        let by_prefix: Vec<&Session> = self
            .sessions
            .iter()
            .filter(|s| s.id.starts_with(selector))
            .collect();
        if by_prefix.len() == 1 {
            return Ok(by_prefix[0]);
        }
        let by_name: Vec<&Session> = self
            .sessions
            .iter()
            .filter(|s| s.name == selector)
            .collect();
        if by_name.len() == 1 {
            return Ok(by_name[0]);
        }
        Err(CleoError::SessionNotFound(selector.to_string()))
    }

    pub fn active(&self) -> Vec<&Session> {
        self.sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active)
            .collect()
    }
}

/// Whether an active session should be garbage-collected as orphaned.
/// A recorded dead PID orphans immediately; otherwise only age past
/// `max_age_hours` does.
pub fn is_orphaned(session: &Session, now: DateTime<Utc>, max_age_hours: i64) -> bool {
    if session.status != SessionStatus::Active {
        return false;
    }
    if let Some(pid) = session.pid
        && !pid_alive(pid)
    {
        return true;
    }
    now - session.started_at > Duration::hours(max_age_hours)
}

#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0) probes existence without signalling; EPERM still
    // means the process exists.
    let rc = unsafe { libc::kill(pid as i32, 0) };
    rc == 0
        || matches!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(code) if code == libc::EPERM
        )
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}
