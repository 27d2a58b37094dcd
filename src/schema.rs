use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::{CleoError, Result};
use crate::graph::{self, Hierarchy};
use crate::model::{Status, format_task_id};
use crate::project::{PhaseStatus, TodoFile, compute_checksum};
use crate::store::sequence::SequenceFile;

/// Enforce the structural invariants on a TodoFile about to be
/// committed. Any failure aborts the mutation before anything reaches
/// disk.
pub fn validate_todo(todo: &TodoFile, archive_ids: &[u64], config: &Config) -> Result<()> {
    let live_ids: HashSet<u64> = todo.tasks.iter().map(|t| t.id).collect();
    if live_ids.len() != todo.tasks.len() {
        return Err(CleoError::ValidationError("duplicate task ids".into()));
    }
    let archived: HashSet<u64> = archive_ids.iter().copied().collect();
    let known = |id: u64| live_ids.contains(&id) || archived.contains(&id);

    let hierarchy = Hierarchy::build(&todo.tasks);
    for task in &todo.tasks {
        if let Some(parent) = task.parent_id {
            if !live_ids.contains(&parent) {
                return Err(CleoError::ValidationError(format!(
                    "task {} references missing parent {}",
                    format_task_id(task.id),
                    format_task_id(parent)
                )));
            }
            if hierarchy.has_parent_cycle(task.id) {
                return Err(CleoError::ValidationError(format!(
                    "parent cycle through {}",
                    format_task_id(task.id)
                )));
            }
        }
        for &dep in task.depends.iter().chain(task.blocked_by.iter()) {
            if !known(dep) {
                return Err(CleoError::ValidationError(format!(
                    "task {} references unknown task {}",
                    format_task_id(task.id),
                    format_task_id(dep)
                )));
            }
        }
        if task.status == Status::Done && task.completed_at.is_none() {
            return Err(CleoError::ValidationError(format!(
                "done task {} is missing completedAt",
                format_task_id(task.id)
            )));
        }
    }

    if config.validation.detect_circular_deps
        && let Some(chain) = graph::find_cycle(&todo.tasks)
    {
        let rendered: Vec<String> = chain.iter().map(|&id| format_task_id(id)).collect();
        return Err(CleoError::CycleDetected(rendered.join(" -> ")));
    }

    let active_phases = todo.project.active_phases();
    if active_phases.len() > 1 {
        let names: Vec<&str> = active_phases.iter().map(|p| p.name.as_str()).collect();
        return Err(CleoError::ValidationError(format!(
            "multiple active phases: {}",
            names.join(", ")
        )));
    }
    for phase in &todo.project.phases {
        match phase.status {
            PhaseStatus::Active if phase.started_at.is_none() => {
                return Err(CleoError::ValidationError(format!(
                    "active phase '{}' is missing startedAt",
                    phase.name
                )));
            }
            PhaseStatus::Completed if phase.completed_at.is_none() => {
                return Err(CleoError::ValidationError(format!(
                    "completed phase '{}' is missing completedAt",
                    phase.name
                )));
            }
            _ => {}
        }
    }

    if config.validation.strict_mode {
        let active = todo
            .tasks
            .iter()
            .filter(|t| t.status == Status::Active)
            .count();
        if active > config.validation.max_active_tasks {
            return Err(CleoError::ValidationError(format!(
                "{} active tasks exceeds maxActiveTasks ({})",
                active, config.validation.max_active_tasks
            )));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueLevel {
    Warn,
    Error,
}

/// One drift finding from a validation scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub code: &'static str,
    pub level: IssueLevel,
    pub message: String,
    pub repairable: bool,
}

impl Issue {
    fn warn(code: &'static str, message: String) -> Self {
        Self {
            code,
            level: IssueLevel::Warn,
            message,
            repairable: true,
        }
    }

    fn error(code: &'static str, message: String) -> Self {
        Self {
            code,
            level: IssueLevel::Error,
            message,
            repairable: true,
        }
    }
}

/// Permissive scan used by validate/doctor/upgrade: reports drift
/// instead of failing. The raw task values are consulted so silently
/// defaulted fields (a missing size) are still visible.
pub fn scan(
    todo: &TodoFile,
    raw_todo: Option<&serde_json::Value>,
    archive_ids: &[u64],
    sequence: &SequenceFile,
) -> Vec<Issue> {
    let mut issues = Vec::new();

    let expected = compute_checksum(&todo.tasks);
    if todo.meta.checksum != expected {
        issues.push(Issue::error(
            "checksum_mismatch",
            "task-list checksum does not match stored _meta.checksum".into(),
        ));
    }

    for task in &todo.tasks {
        if task.status == Status::Done && task.completed_at.is_none() {
            issues.push(Issue::warn(
                "missing_completed_at",
                format!("done task {} has no completedAt", format_task_id(task.id)),
            ));
        }
    }

    if let Some(raw) = raw_todo
        && let Some(raw_tasks) = raw.get("tasks").and_then(|t| t.as_array())
    {
        for raw_task in raw_tasks {
            if raw_task.get("size").is_none() {
                let id = raw_task.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
                issues.push(Issue::warn(
                    "missing_size",
                    format!("task {} has no size; defaults to medium", format_task_id(id)),
                ));
            }
        }
    }

    let observed_max = todo
        .max_task_id()
        .max(archive_ids.iter().copied().max().unwrap_or(0));
    if sequence.counter < observed_max {
        issues.push(Issue::error(
            "sequence_behind",
            format!(
                "sequence counter {} is behind observed max id {}",
                sequence.counter, observed_max
            ),
        ));
    } else if !sequence.checksum_valid() {
        issues.push(Issue::warn(
            "sequence_checksum",
            "sequence checksum does not match counter state".into(),
        ));
    }

    if todo.project.active_phases().len() > 1 {
        issues.push(Issue::error(
            "multiple_active_phases",
            "more than one phase is active".into(),
        ));
    }

    let live: HashSet<u64> = todo.tasks.iter().map(|t| t.id).collect();
    let archived: HashSet<u64> = archive_ids.iter().copied().collect();
    for task in &todo.tasks {
        for &dep in task.depends.iter().chain(task.blocked_by.iter()) {
            if !live.contains(&dep) && !archived.contains(&dep) {
                issues.push(Issue::warn(
                    "dangling_reference",
                    format!(
                        "task {} references unknown task {}",
                        format_task_id(task.id),
                        format_task_id(dep)
                    ),
                ));
            }
        }
    }

    issues
}

/// One structural repair, either previewed or applied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairAction {
    pub action: &'static str,
    pub detail: String,
    pub status: &'static str,
}

/// Apply every structural repair in place and report what changed.
/// Counter repair only ever advances; phase collapse keeps the
/// highest-order active phase.
pub fn repair(
    todo: &mut TodoFile,
    sequence: &mut SequenceFile,
    archive_ids: &[u64],
    now: DateTime<Utc>,
) -> Vec<RepairAction> {
    let mut actions = Vec::new();

    for task in &mut todo.tasks {
        if task.status == Status::Done && task.completed_at.is_none() {
            task.completed_at = Some(now);
            actions.push(RepairAction {
                action: "backfill_completed_at",
                detail: format_task_id(task.id),
                status: "applied",
            });
        }
    }

    let observed_max = todo
        .max_task_id()
        .max(archive_ids.iter().copied().max().unwrap_or(0));
    if sequence.counter < observed_max || !sequence.checksum_valid() {
        sequence.repair_to(observed_max).ok();
        actions.push(RepairAction {
            action: "sequence_catch_up",
            detail: format!("counter -> {}", sequence.counter),
            status: "applied",
        });
    }

    let active: Vec<String> = todo
        .project
        .active_phases()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    if active.len() > 1 {
        // Highest order wins; the rest roll back to pending.
        let keep = active.last().cloned().unwrap_or_default();
        for name in &active {
            if *name != keep
                && let Some(phase) = todo.project.phase_mut(name)
            {
                phase.status = PhaseStatus::Pending;
                phase.started_at = None;
            }
        }
        actions.push(RepairAction {
            action: "collapse_active_phases",
            detail: format!("kept '{keep}'"),
            status: "applied",
        });
    }

    let live: HashSet<u64> = todo.tasks.iter().map(|t| t.id).collect();
    let archived: HashSet<u64> = archive_ids.iter().copied().collect();
    let known = |id: &u64| live.contains(id) || archived.contains(id);
    for task in &mut todo.tasks {
        let before = task.depends.len() + task.blocked_by.len();
        task.depends.retain(known);
        task.blocked_by.retain(known);
        let dropped = before - task.depends.len() - task.blocked_by.len();
        if dropped > 0 {
            actions.push(RepairAction {
                action: "drop_dangling_references",
                detail: format!("{} ({dropped} refs)", format_task_id(task.id)),
                status: "applied",
            });
        }
    }

    let expected = compute_checksum(&todo.tasks);
    if todo.meta.checksum != expected {
        todo.meta.checksum = expected;
        actions.push(RepairAction {
            action: "recompute_checksum",
            detail: "_meta.checksum".into(),
            status: "applied",
        });
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;
    use crate::project::Phase;

    fn base() -> (TodoFile, Config) {
        (TodoFile::empty(Utc::now()), Config::default())
    }

    #[test]
    fn valid_empty_todo_passes() {
        let (todo, config) = base();
        validate_todo(&todo, &[], &config).unwrap();
    }

    #[test]
    fn missing_parent_rejected() {
        let (mut todo, config) = base();
        let mut task = Task::new(1, "child", Utc::now());
        task.parent_id = Some(9);
        todo.tasks.push(task);
        assert!(validate_todo(&todo, &[], &config).is_err());
    }

    #[test]
    fn archived_dependency_is_a_valid_reference() {
        let (mut todo, config) = base();
        let mut task = Task::new(2, "later", Utc::now());
        task.depends = vec![1];
        todo.tasks.push(task);

        assert!(validate_todo(&todo, &[], &config).is_err());
        validate_todo(&todo, &[1], &config).unwrap();
    }

    #[test]
    fn done_without_completed_at_rejected() {
        let (mut todo, config) = base();
        let mut task = Task::new(1, "done", Utc::now());
        task.status = Status::Done;
        todo.tasks.push(task);
        let err = validate_todo(&todo, &[], &config).unwrap_err();
        assert!(err.to_string().contains("completedAt"));
    }

    #[test]
    fn dependency_cycle_rejected_when_detection_enabled() {
        let (mut todo, mut config) = base();
        let now = Utc::now();
        let mut a = Task::new(1, "a", now);
        a.depends = vec![2];
        let mut b = Task::new(2, "b", now);
        b.depends = vec![1];
        todo.tasks.push(a);
        todo.tasks.push(b);

        assert!(validate_todo(&todo, &[], &config).is_err());
        config.validation.detect_circular_deps = false;
        validate_todo(&todo, &[], &config).unwrap();
    }

    #[test]
    fn two_active_phases_rejected() {
        let (mut todo, config) = base();
        let now = Utc::now();
        for (name, order) in [("setup", 1), ("core", 2)] {
            let mut phase = Phase::new(name, order);
            phase.status = PhaseStatus::Active;
            phase.started_at = Some(now);
            todo.project.phases.push(phase);
        }
        let err = validate_todo(&todo, &[], &config).unwrap_err();
        assert!(err.to_string().contains("multiple active phases"));
    }

    #[test]
    fn strict_mode_enforces_max_active_tasks() {
        let (mut todo, mut config) = base();
        config.validation.strict_mode = true;
        config.validation.max_active_tasks = 1;
        let now = Utc::now();
        for id in 1..=2 {
            let mut t = Task::new(id, format!("t{id}"), now);
            t.status = Status::Active;
            todo.tasks.push(t);
        }
        assert!(validate_todo(&todo, &[], &config).is_err());
        config.validation.strict_mode = false;
        validate_todo(&todo, &[], &config).unwrap();
    }

    #[test]
    fn scan_reports_checksum_and_sequence_drift() {
        let (mut todo, _) = base();
        let now = Utc::now();
        todo.tasks.push(Task::new(3, "t", now));
        todo.meta.checksum = "stale".into();
        let sequence = SequenceFile::initial();

        let issues = scan(&todo, None, &[], &sequence);
        let codes: Vec<&str> = issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&"checksum_mismatch"));
        assert!(codes.contains(&"sequence_behind"));
    }

    #[test]
    fn scan_sees_missing_size_in_raw_document() {
        let (mut todo, _) = base();
        todo.tasks.push(Task::new(1, "t", Utc::now()));
        todo.refresh_meta(Utc::now());
        let raw = serde_json::json!({"tasks": [{"id": 1, "title": "t"}]});
        let mut sequence = SequenceFile::initial();
        sequence.repair_to(1).unwrap();

        let issues = scan(&todo, Some(&raw), &[], &sequence);
        assert!(issues.iter().any(|i| i.code == "missing_size"));
    }

    #[test]
    fn repair_fixes_all_repairable_drift() {
        let (mut todo, config) = base();
        let now = Utc::now();

        let mut done = Task::new(1, "done", now);
        done.status = Status::Done;
        todo.tasks.push(done);

        let mut dangling = Task::new(2, "dangling", now);
        dangling.depends = vec![1, 42];
        todo.tasks.push(dangling);

        for (name, order) in [("setup", 1), ("core", 2)] {
            let mut phase = Phase::new(name, order);
            phase.status = PhaseStatus::Active;
            phase.started_at = Some(now);
            todo.project.phases.push(phase);
        }

        let mut sequence = SequenceFile::initial();
        let actions = repair(&mut todo, &mut sequence, &[], now);
        let kinds: Vec<&str> = actions.iter().map(|a| a.action).collect();
        assert!(kinds.contains(&"backfill_completed_at"));
        assert!(kinds.contains(&"sequence_catch_up"));
        assert!(kinds.contains(&"collapse_active_phases"));
        assert!(kinds.contains(&"drop_dangling_references"));
        assert!(kinds.contains(&"recompute_checksum"));

        // Post-repair state satisfies the strict invariants.
        validate_todo(&todo, &[], &config).unwrap();
        assert_eq!(sequence.counter, 2);
        assert_eq!(todo.project.active_phases().len(), 1);
        assert_eq!(todo.project.active_phases()[0].name, "core");
        assert_eq!(todo.tasks[1].depends, vec![1]);
    }

    #[test]
    fn repair_is_idempotent() {
        let (mut todo, _) = base();
        let now = Utc::now();
        let mut done = Task::new(1, "done", now);
        done.status = Status::Done;
        todo.tasks.push(done);
        let mut sequence = SequenceFile::initial();

        let first = repair(&mut todo, &mut sequence, &[], now);
        assert!(!first.is_empty());
        todo.refresh_meta(now);
        let second = repair(&mut todo, &mut sequence, &[], now);
        assert!(second.is_empty());
    }
}
