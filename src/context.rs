use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::paths::CleoPaths;
use crate::session::pid_alive;
use crate::store::atomic;
use crate::store::lock::{STALE_LOCK_SECS, read_lock_info};

/// Freshness window for context state files.
pub const STATE_TTL_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Ok,
    Warning,
    Caution,
    Critical,
    Emergency,
    Stale,
}

impl std::fmt::Display for UsageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Caution => write!(f, "caution"),
            Self::Critical => write!(f, "critical"),
            Self::Emergency => write!(f, "emergency"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

impl UsageLevel {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Warning => 50,
            Self::Caution => 51,
            Self::Critical => 52,
            Self::Emergency => 53,
            Self::Stale => 54,
        }
    }
}

/// Classify a usage percentage against the alert thresholds.
pub fn classify(percent: f64) -> UsageLevel {
    if percent >= 95.0 {
        UsageLevel::Emergency
    } else if percent >= 90.0 {
        UsageLevel::Critical
    } else if percent >= 85.0 {
        UsageLevel::Caution
    } else if percent >= 70.0 {
        UsageLevel::Warning
    } else {
        UsageLevel::Ok
    }
}

/// One `{context_window_size, current_usage}` record from the host
/// runtime, persisted per session with a freshness TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextState {
    pub session_id: String,
    pub context_window_size: u64,
    pub current_usage: u64,
    pub recorded_at: DateTime<Utc>,
}

impl ContextState {
    pub fn percent(&self) -> f64 {
        if self.context_window_size == 0 {
            return 0.0;
        }
        self.current_usage as f64 * 100.0 / self.context_window_size as f64
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        (now - self.recorded_at).num_seconds() > STATE_TTL_SECS
    }
}

pub fn write_state(paths: &CleoPaths, state: &ContextState) -> Result<()> {
    atomic::write_json_atomic(&paths.context_state_file(&state.session_id), state)
}

/// Read the per-session state; anything past the TTL is treated as
/// absent rather than trusted.
pub fn read_state(paths: &CleoPaths, session_id: &str) -> Result<Option<ContextState>> {
    let path = paths.context_state_file(session_id);
    if !path.exists() {
        return Ok(None);
    }
    let state: ContextState = atomic::read_json(&path)?;
    Ok(Some(state))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertState {
    level: UsageLevel,
    alerted_at: DateTime<Utc>,
}

/// Deduplicated alert decision: re-alert only when the level advances,
/// or when the suppress window has elapsed at the same level.
pub fn should_alert(
    paths: &CleoPaths,
    config: &Config,
    session_id: &str,
    level: UsageLevel,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !config.context_alerts.enabled || level == UsageLevel::Ok {
        return Ok(false);
    }
    let path = paths.context_alert_file(session_id);
    let previous: Option<AlertState> = if path.exists() {
        Some(atomic::read_json(&path)?)
    } else {
        None
    };

    let fire = match &previous {
        None => true,
        Some(prev) if level > prev.level => true,
        Some(prev) => {
            let elapsed = (now - prev.alerted_at).num_seconds();
            level == prev.level && elapsed >= config.context_alerts.suppress_duration as i64
        }
    };

    if fire {
        atomic::write_json_atomic(
            &path,
            &AlertState {
                level,
                alerted_at: now,
            },
        )?;
    }
    Ok(fire)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Active,
    Stale,
    Orphaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnSeverity {
    Info,
    Warn,
    Block,
}

/// One finding from the lock-awareness scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockWarning {
    pub resource: String,
    pub state: LockState,
    pub severity: WarnSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub age_secs: u64,
    pub message: String,
}

/// Resources where a concurrent writer is most damaging; their
/// contention escalates to BLOCK unless warn-only mode is configured.
const HIGH_RISK: [&str; 3] = ["todo-archive", "sessions", "config"];

/// Scan `.cleo/*.lock` files and classify each holder. A lock whose
/// owning PID is alive and recent is active; past the stale threshold
/// it is stale; a dead PID is orphaned.
pub fn scan_locks(paths: &CleoPaths, config: &Config) -> Result<Vec<LockWarning>> {
    let mut warnings = Vec::new();
    if !config.analyze.lock_awareness.enabled {
        return Ok(warnings);
    }
    let warn_only = config.analyze.lock_awareness.warn_only;

    let dir = paths.cleo_dir();
    if !dir.is_dir() {
        return Ok(warnings);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "lock"))
        .collect();
    entries.sort();

    for path in entries {
        let resource = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some(info) = read_lock_info(&path) else {
            continue;
        };
        let age = info.age_secs();
        let own = info.pid == std::process::id();

        let state = if !pid_alive(info.pid) {
            LockState::Orphaned
        } else if age > STALE_LOCK_SECS {
            LockState::Stale
        } else {
            LockState::Active
        };

        let severity = match state {
            LockState::Orphaned => WarnSeverity::Info,
            LockState::Stale => WarnSeverity::Warn,
            LockState::Active if own => WarnSeverity::Info,
            LockState::Active => {
                let high_risk = HIGH_RISK.contains(&resource.as_str());
                if high_risk && !warn_only {
                    WarnSeverity::Block
                } else {
                    WarnSeverity::Warn
                }
            }
        };

        let message = match state {
            LockState::Active => format!(
                "resource '{resource}' locked by pid {} ({age}s ago)",
                info.pid
            ),
            LockState::Stale => format!(
                "lock on '{resource}' exceeded the stale threshold ({age}s); reclaimable"
            ),
            LockState::Orphaned => {
                format!("lock on '{resource}' held by dead pid {}; safe to remove", info.pid)
            }
        };

        warnings.push(LockWarning {
            resource,
            state,
            severity,
            pid: Some(info.pid),
            age_secs: age,
            message,
        });
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::lock::LockInfo;
    use tempfile::tempdir;

    fn paths_in(dir: &std::path::Path) -> CleoPaths {
        let paths = CleoPaths::new(dir);
        std::fs::create_dir_all(paths.cleo_dir()).unwrap();
        paths
    }

    #[test]
    fn thresholds_classify_per_contract() {
        assert_eq!(classify(10.0), UsageLevel::Ok);
        assert_eq!(classify(69.9), UsageLevel::Ok);
        assert_eq!(classify(70.0), UsageLevel::Warning);
        assert_eq!(classify(85.0), UsageLevel::Caution);
        assert_eq!(classify(90.0), UsageLevel::Critical);
        assert_eq!(classify(95.0), UsageLevel::Emergency);
    }

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(UsageLevel::Ok.exit_code(), 0);
        assert_eq!(UsageLevel::Warning.exit_code(), 50);
        assert_eq!(UsageLevel::Caution.exit_code(), 51);
        assert_eq!(UsageLevel::Critical.exit_code(), 52);
        assert_eq!(UsageLevel::Emergency.exit_code(), 53);
        assert_eq!(UsageLevel::Stale.exit_code(), 54);
    }

    #[test]
    fn state_round_trips_and_ages_out() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let now = Utc::now();

        let state = ContextState {
            session_id: "s1".into(),
            context_window_size: 200_000,
            current_usage: 150_000,
            recorded_at: now,
        };
        write_state(&paths, &state).unwrap();

        let loaded = read_state(&paths, "s1").unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!((loaded.percent() - 75.0).abs() < f64::EPSILON);
        assert!(!loaded.is_stale(now));
        assert!(loaded.is_stale(now + chrono::Duration::seconds(STATE_TTL_SECS + 1)));
    }

    #[test]
    fn missing_state_reads_as_none() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        assert!(read_state(&paths, "nope").unwrap().is_none());
    }

    #[test]
    fn alerts_fire_once_then_only_on_advance() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let config = Config::default();
        let now = Utc::now();

        assert!(should_alert(&paths, &config, "s1", UsageLevel::Warning, now).unwrap());
        // Same level inside the suppress window stays quiet.
        assert!(!should_alert(&paths, &config, "s1", UsageLevel::Warning, now).unwrap());
        // Advancing level re-alerts.
        assert!(should_alert(&paths, &config, "s1", UsageLevel::Critical, now).unwrap());
        // Dropping back does not.
        assert!(!should_alert(&paths, &config, "s1", UsageLevel::Warning, now).unwrap());
    }

    #[test]
    fn suppress_window_expiry_re_alerts_same_level() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let config = Config::default();
        let now = Utc::now();

        assert!(should_alert(&paths, &config, "s1", UsageLevel::Caution, now).unwrap());
        let later = now + chrono::Duration::seconds(config.context_alerts.suppress_duration as i64 + 1);
        assert!(should_alert(&paths, &config, "s1", UsageLevel::Caution, later).unwrap());
    }

    #[test]
    fn ok_level_and_disabled_alerts_never_fire() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let mut config = Config::default();
        let now = Utc::now();

        assert!(!should_alert(&paths, &config, "s1", UsageLevel::Ok, now).unwrap());
        config.context_alerts.enabled = false;
        assert!(!should_alert(&paths, &config, "s1", UsageLevel::Emergency, now).unwrap());
    }

    #[test]
    fn lock_scan_classifies_orphaned_and_foreign_locks() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let config = Config::default();

        // Orphaned: dead pid.
        let dead = LockInfo {
            pid: 4_000_000,
            created_at: chrono::Utc::now().timestamp() as u64,
        };
        std::fs::write(
            paths.lock_file("todo"),
            serde_json::to_string(&dead).unwrap(),
        )
        .unwrap();

        // Active high-risk: own pid, recent, on sessions.
        let own = LockInfo {
            pid: std::process::id(),
            created_at: chrono::Utc::now().timestamp() as u64,
        };
        std::fs::write(
            paths.lock_file("sessions"),
            serde_json::to_string(&own).unwrap(),
        )
        .unwrap();

        let warnings = scan_locks(&paths, &config).unwrap();
        assert_eq!(warnings.len(), 2);

        let sessions = warnings.iter().find(|w| w.resource == "sessions").unwrap();
        assert_eq!(sessions.state, LockState::Active);
        // Own process lock stays informational.
        assert_eq!(sessions.severity, WarnSeverity::Info);

        let todo = warnings.iter().find(|w| w.resource == "todo").unwrap();
        assert_eq!(todo.state, LockState::Orphaned);
        assert_eq!(todo.severity, WarnSeverity::Info);
    }

    #[test]
    fn stale_lock_warns_and_disabled_scan_is_empty() {
        let dir = tempdir().unwrap();
        let paths = paths_in(dir.path());
        let mut config = Config::default();

        let stale = LockInfo {
            pid: std::process::id(),
            created_at: 0,
        };
        std::fs::write(
            paths.lock_file("todo"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let warnings = scan_locks(&paths, &config).unwrap();
        assert_eq!(warnings[0].state, LockState::Stale);
        assert_eq!(warnings[0].severity, WarnSeverity::Warn);

        config.analyze.lock_awareness.enabled = false;
        assert!(scan_locks(&paths, &config).unwrap().is_empty());
    }
}
