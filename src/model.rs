use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{CleoError, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    Active,
    Blocked,
    Done,
    Cancelled,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum Size {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum Kind {
    Epic,
    #[default]
    Task,
    Subtask,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Blocked => write!(f, "blocked"),
            Self::Done => write!(f, "done"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epic => write!(f, "epic"),
            Self::Task => write!(f, "task"),
            Self::Subtask => write!(f, "subtask"),
        }
    }
}

impl Priority {
    pub fn weight(self) -> i64 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 5,
            Self::Critical => 10,
        }
    }
}

impl Size {
    pub fn weight(self) -> i64 {
        match self {
            Self::Small => 1,
            Self::Medium => 3,
            Self::Large => 8,
        }
    }
}

/// Render a numeric task id in its stable `T`-prefixed form.
pub fn format_task_id(id: u64) -> String {
    format!("T{id:03}")
}

/// Parse a task id argument: accepts `T001`, `t1`, or a bare number.
pub fn parse_task_id(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix('T')
        .or_else(|| trimmed.strip_prefix('t'))
        .unwrap_or(trimmed);
    digits
        .parse::<u64>()
        .ok()
        .filter(|&id| id > 0)
        .ok_or_else(|| CleoError::InvalidInput(format!("invalid task id '{input}'")))
}

/// One timestamped entry in a task's append-only notes list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// The six verification gates, in their fixed order. Setting a gate
/// invalidates everything downstream of it.
pub const GATE_ORDER: [&str; 6] = [
    "implemented",
    "testsPassed",
    "qaPassed",
    "securityPassed",
    "documented",
    "reserved",
];

/// Gates whose setter participates in circular-approval checks.
pub const VALIDATION_GATES: [&str; 2] = ["qaPassed", "securityPassed"];

pub const MAX_VERIFICATION_ROUNDS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    pub gate: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub passed: bool,
    pub round: u32,
    pub implemented: Option<bool>,
    pub tests_passed: Option<bool>,
    pub qa_passed: Option<bool>,
    pub security_passed: Option<bool>,
    pub documented: Option<bool>,
    pub reserved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Most recent setter per gate, for circular-approval checks.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub gate_agents: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_log: Vec<FailureEntry>,
}

impl Default for Verification {
    fn default() -> Self {
        Self {
            passed: false,
            round: 0,
            implemented: None,
            tests_passed: None,
            qa_passed: None,
            security_passed: None,
            documented: None,
            reserved: None,
            last_agent: None,
            last_updated: None,
            gate_agents: std::collections::BTreeMap::new(),
            failure_log: Vec::new(),
        }
    }
}

impl Verification {
    pub fn gate(&self, name: &str) -> Option<Option<bool>> {
        match name {
            "implemented" => Some(self.implemented),
            "testsPassed" => Some(self.tests_passed),
            "qaPassed" => Some(self.qa_passed),
            "securityPassed" => Some(self.security_passed),
            "documented" => Some(self.documented),
            "reserved" => Some(self.reserved),
            _ => None,
        }
    }

    pub fn set_gate(&mut self, name: &str, value: Option<bool>) {
        match name {
            "implemented" => self.implemented = value,
            "testsPassed" => self.tests_passed = value,
            "qaPassed" => self.qa_passed = value,
            "securityPassed" => self.security_passed = value,
            "documented" => self.documented = value,
            "reserved" => self.reserved = value,
            _ => {}
        }
    }

    /// Overall pass = every required gate (all but `reserved`) is true.
    pub fn evaluate(&self) -> bool {
        [
            self.implemented,
            self.tests_passed,
            self.qa_passed,
            self.security_passed,
            self.documented,
        ]
        .iter()
        .all(|g| *g == Some(true))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: Status,
    pub priority: Priority,
    pub size: Size,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub verification: Verification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: u64, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            description: None,
            status: Status::Pending,
            priority: Priority::Medium,
            size: Size::Medium,
            kind: None,
            parent_id: None,
            phase: None,
            labels: Vec::new(),
            depends: Vec::new(),
            blocked_by: Vec::new(),
            files: Vec::new(),
            acceptance: Vec::new(),
            notes: Vec::new(),
            verification: Verification::default(),
            created_by: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
            archived_at: None,
        }
    }

    pub fn is_epic(&self) -> bool {
        self.kind == Some(Kind::Epic)
    }

    /// Trim whitespace, drop empty labels, then deduplicate and sort
    /// labels and id lists for deterministic storage.
    pub fn normalize(&mut self) {
        for label in &mut self.labels {
            let trimmed = label.trim();
            if trimmed.len() != label.len() {
                *label = trimmed.to_string();
            }
        }
        self.labels.retain(|l| !l.is_empty());
        self.labels.sort();
        self.labels.dedup();
        self.depends.sort_unstable();
        self.depends.dedup();
        self.blocked_by.sort_unstable();
        self.blocked_by.dedup();
    }

    /// Ordering score used by `next` suggestions and `list --by-score`.
    pub fn score(&self) -> i64 {
        let status_bonus = match self.status {
            Status::Active => 50,
            Status::Blocked => -20,
            _ => 0,
        };
        self.priority.weight() * 10 + (8 - self.size.weight()) * 2 + status_bonus
    }

    pub fn add_note(&mut self, text: impl Into<String>, author: Option<String>, now: DateTime<Utc>) {
        self.notes.push(Note {
            text: text.into(),
            timestamp: now,
            author,
        });
    }
}
