use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Json,
    Sqlite,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_days_until_archive")]
    pub days_until_archive: i64,
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent_count: usize,
    #[serde(default)]
    pub archive_on_session_end: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days_until_archive: default_days_until_archive(),
            preserve_recent_count: default_preserve_recent(),
            archive_on_session_end: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default = "default_max_active")]
    pub max_active_tasks: usize,
    #[serde(default = "default_true")]
    pub validate_dependencies: bool,
    #[serde(default = "default_true")]
    pub detect_circular_deps: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_active_tasks: default_max_active(),
            validate_dependencies: true,
            detect_circular_deps: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAlertsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds during which an already-alerted level is not repeated.
    #[serde(default = "default_suppress_duration")]
    pub suppress_duration: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_commands: Vec<String>,
}

impl Default for ContextAlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suppress_duration: default_suppress_duration(),
            trigger_commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAwarenessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub warn_only: bool,
}

impl Default for LockAwarenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warn_only: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeConfig {
    #[serde(default)]
    pub lock_awareness: LockAwarenessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub require_session: bool,
    #[serde(default)]
    pub require_session_note: bool,
    #[serde(default = "default_session_max_age")]
    pub max_age_hours: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            require_session: false,
            require_session_note: false,
            max_age_hours: default_session_max_age(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Project configuration (`config.json`). Unknown keys are preserved
/// across rewrites so upgrades never strip operator settings.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub context_alerts: ContextAlertsConfig,
    #[serde(default)]
    pub analyze: AnalyzeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

fn default_days_until_archive() -> i64 {
    14
}

fn default_preserve_recent() -> usize {
    10
}

fn default_max_active() -> usize {
    10
}

fn default_suppress_duration() -> u64 {
    300
}

fn default_session_max_age() -> i64 {
    72
}
