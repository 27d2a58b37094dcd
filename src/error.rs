use thiserror::Error;

#[derive(Debug, Error)]
pub enum CleoError {
    #[error("not a cleo project (run `cleo init` first)")]
    NotInitialized,

    #[error("cleo already initialized in this project")]
    AlreadyInitialized,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown operation '{1}' in domain '{0}'")]
    InvalidOperation(String, String),

    #[error("operation '{0}' requires the cleo engine CLI; install it and retry")]
    CliRequired(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("phase '{0}' not found")]
    PhaseNotFound(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("dependency cycle: {0}")]
    CycleDetected(String),

    #[error("invalid status transition: {0} -> {1}")]
    InvalidTransition(String, String),

    #[error("task {0} has children; choose a delete strategy")]
    TaskHasChildren(String),

    #[error("file error at {path}: {reason}")]
    FileError { path: String, reason: String },

    #[error("could not acquire lock on {0} within the wait ceiling")]
    LockFailed(String),

    #[error("backward phase move to '{0}' requires --rollback (and --force in non-interactive use)")]
    PhaseRollbackRequiresForce(String),

    #[error("verification gate '{gate}' rejected: {reason}")]
    GateRejected { gate: String, reason: String },

    #[error("verification round limit reached for task {0}")]
    VerificationRoundsExhausted(String),

    #[error("context usage at {level} ({percent:.0}%)")]
    ContextThreshold { level: String, percent: f64 },

    #[error("context state is stale")]
    ContextStale,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl CleoError {
    /// Numeric code in the exit-code taxonomy. Equal to the process exit
    /// code for every error the gateway surfaces.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 1,
            Self::InvalidOperation(_, _) => 2,
            Self::CliRequired(_) => 3,
            Self::NotInitialized
            | Self::TaskNotFound(_)
            | Self::PhaseNotFound(_)
            | Self::SessionNotFound(_) => 4,
            Self::AlreadyInitialized | Self::AlreadyExists(_) => 5,
            Self::ValidationError(_)
            | Self::CycleDetected(_)
            | Self::InvalidTransition(_, _)
            | Self::TaskHasChildren(_)
            | Self::GateRejected { .. }
            | Self::VerificationRoundsExhausted(_) => 6,
            Self::FileError { .. } | Self::Io(_) | Self::Json(_) | Self::Db(_) => 7,
            Self::LockFailed(_) => 8,
            Self::PhaseRollbackRequiresForce(_) => 9,
            Self::ContextThreshold { level, .. } => match level.as_str() {
                "warning" => 50,
                "caution" => 51,
                "critical" => 52,
                "emergency" => 53,
                _ => 54,
            },
            Self::ContextStale => 54,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidOperation(_, _) => "INVALID_OPERATION",
            Self::CliRequired(_) => "CLI_REQUIRED",
            Self::TaskNotFound(_) | Self::PhaseNotFound(_) | Self::SessionNotFound(_) => {
                "NOT_FOUND"
            }
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::ValidationError(_) | Self::CycleDetected(_) => "VALIDATION_ERROR",
            Self::InvalidTransition(_, _) => "INVALID_TRANSITION",
            Self::TaskHasChildren(_) => "TASK_HAS_CHILDREN",
            Self::FileError { .. } | Self::Io(_) | Self::Json(_) | Self::Db(_) => "FILE_ERROR",
            Self::LockFailed(_) => "LOCK_FAILED",
            Self::PhaseRollbackRequiresForce(_) => "PHASE_ROLLBACK_REQUIRES_FORCE",
            Self::GateRejected { .. } => "GATE_REJECTED",
            Self::VerificationRoundsExhausted(_) => "VERIFICATION_ROUNDS_EXHAUSTED",
            Self::ContextThreshold { .. } => "CONTEXT_THRESHOLD",
            Self::ContextStale => "CONTEXT_STALE",
        }
    }

    /// Remediation hint included in error envelopes where one exists.
    pub fn fix(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("run `cleo init` in the project root".into()),
            Self::CliRequired(_) => Some("install the cleo engine CLI and retry".into()),
            Self::TaskHasChildren(id) => Some(format!(
                "re-run with `--children cascade` to delete descendants of {id}, or `--children orphan` to re-parent them"
            )),
            Self::PhaseRollbackRequiresForce(phase) => Some(format!(
                "re-run with `--rollback --force` to move back to '{phase}'"
            )),
            Self::CycleDetected(chain) => Some(format!("break the dependency chain: {chain}")),
            Self::LockFailed(_) => Some(
                "another process holds the lock; retry, or remove a stale .lock file older than 5 minutes"
                    .into(),
            ),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CleoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy_partitions() {
        assert_eq!(CleoError::InvalidInput("x".into()).code(), 1);
        assert_eq!(
            CleoError::InvalidOperation("tasks".into(), "zap".into()).code(),
            2
        );
        assert_eq!(CleoError::CliRequired("research".into()).code(), 3);
        assert_eq!(CleoError::TaskNotFound("T001".into()).code(), 4);
        assert_eq!(CleoError::AlreadyExists("phase core".into()).code(), 5);
        assert_eq!(CleoError::ValidationError("bad".into()).code(), 6);
        assert_eq!(
            CleoError::FileError {
                path: "todo.json".into(),
                reason: "denied".into()
            }
            .code(),
            7
        );
        assert_eq!(CleoError::LockFailed("todo.lock".into()).code(), 8);
        assert_eq!(
            CleoError::PhaseRollbackRequiresForce("setup".into()).code(),
            9
        );
    }

    #[test]
    fn context_levels_map_to_50_range() {
        for (level, code) in [
            ("warning", 50),
            ("caution", 51),
            ("critical", 52),
            ("emergency", 53),
        ] {
            let err = CleoError::ContextThreshold {
                level: level.into(),
                percent: 90.0,
            };
            assert_eq!(err.code(), code);
        }
        assert_eq!(CleoError::ContextStale.code(), 54);
    }

    #[test]
    fn lookup_errors_share_not_found_name() {
        assert_eq!(CleoError::TaskNotFound("T009".into()).name(), "NOT_FOUND");
        assert_eq!(CleoError::PhaseNotFound("qa".into()).name(), "NOT_FOUND");
    }

    #[test]
    fn fix_present_where_remedy_exists() {
        assert!(CleoError::NotInitialized.fix().is_some());
        assert!(
            CleoError::TaskHasChildren("T003".into())
                .fix()
                .unwrap()
                .contains("cascade")
        );
        assert!(CleoError::Io(std::io::Error::other("x")).fix().is_none());
    }
}
