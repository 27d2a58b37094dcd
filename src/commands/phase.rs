use chrono::Utc;
use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::project::{Phase, PhaseStatus, PhaseTransition, PhaseTransitionKind};
use crate::store::workspace::{Mutation, Workspace};

use super::{opt_bool, opt_str, require_str, workspace};

/// Register a phase without activating it. Unknown targets of a
/// forward `set` are defined on the fly with the next order slot.
pub fn ensure_defined(ws: &Workspace, name: &str) -> Result<()> {
    ws.mutate_todo(|todo| {
        if todo.project.phase(name).is_some() {
            return Ok(Mutation::new((), vec![]));
        }
        let order = todo
            .project
            .phases
            .iter()
            .map(|p| p.order)
            .max()
            .unwrap_or(0)
            + 1;
        todo.project.phases.push(Phase::new(name, order));
        Ok(Mutation::new((), vec![]))
    })
}

pub fn show(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let todo = ws.load_todo()?;

    let phases: Vec<Value> = todo
        .project
        .phases_in_order()
        .iter()
        .map(|p| {
            let tasks = todo
                .tasks
                .iter()
                .filter(|t| t.phase.as_deref() == Some(p.name.as_str()))
                .count();
            json!({
                "name": p.name,
                "order": p.order,
                "status": p.status.to_string(),
                "taskCount": tasks,
            })
        })
        .collect();

    Ok(Outcome::data(json!({
        "phases": phases,
        "currentPhase": todo.project.current_phase,
        "history": serde_json::to_value(&todo.project.phase_history)?,
    })))
}

/// Move the project to a phase. Forward moves auto-complete the
/// previous active phase; backward moves need `--rollback`, and
/// `--force` when no interactive confirmation is possible. History is
/// append-only in both directions.
pub fn set(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let target = require_str(params, "target")?;
    let rollback = opt_bool(params, "rollback");
    let force = opt_bool(params, "force");
    let interactive = opt_bool(params, "interactive");
    let reason = opt_str(params, "reason");

    let result = ws.mutate_todo(|todo| {
        let now = Utc::now();

        let current = todo
            .project
            .active_phases()
            .first()
            .map(|p| (p.name.clone(), p.order));

        if current.as_ref().is_some_and(|(name, _)| *name == target) {
            return Ok(Mutation::new((target.clone(), false), vec![]));
        }

        // Unknown target: defined on the fly as the next phase in order.
        if todo.project.phase(&target).is_none() {
            let order = todo
                .project
                .phases
                .iter()
                .map(|p| p.order)
                .max()
                .unwrap_or(0)
                + 1;
            todo.project.phases.push(Phase::new(target.clone(), order));
        }
        let target_order = todo.project.phase(&target).map(|p| p.order).unwrap_or(0);

        let backward = current
            .as_ref()
            .is_some_and(|&(_, order)| target_order < order);
        if backward && (!rollback || (!force && !interactive)) {
            return Err(CleoError::PhaseRollbackRequiresForce(target.clone()));
        }

        let mut records = Vec::new();
        let from_phase = current.as_ref().map(|(name, _)| name.clone());

        if let Some((current_name, _)) = &current {
            let phase = todo.project.phase_mut(current_name).unwrap();
            if backward {
                // Rollback re-opens the current phase rather than
                // pretending it completed.
                phase.status = PhaseStatus::Pending;
                phase.started_at = None;
            } else {
                phase.status = PhaseStatus::Completed;
                phase.completed_at = Some(now);
                let count = todo
                    .tasks
                    .iter()
                    .filter(|t| t.phase.as_deref() == Some(current_name.as_str()))
                    .count();
                todo.project.phase_history.push(PhaseTransition {
                    phase: current_name.clone(),
                    transition: PhaseTransitionKind::Completed,
                    timestamp: now,
                    from_phase: None,
                    task_count: count,
                    reason: None,
                });
                records.push(AuditRecord::new(
                    "phase_completed",
                    None,
                    json!({"phase": current_name}),
                ));
            }
        }

        let task_count = todo
            .tasks
            .iter()
            .filter(|t| t.phase.as_deref() == Some(target.as_str()))
            .count();
        {
            let phase = todo.project.phase_mut(&target).unwrap();
            phase.status = PhaseStatus::Active;
            phase.started_at = Some(now);
            phase.completed_at = None;
        }
        todo.project.current_phase = Some(target.clone());
        let transition = if backward {
            PhaseTransitionKind::RolledBack
        } else {
            PhaseTransitionKind::Started
        };
        todo.project.phase_history.push(PhaseTransition {
            phase: target.clone(),
            transition,
            timestamp: now,
            from_phase: from_phase.clone(),
            task_count,
            reason: reason.clone(),
        });
        records.push(AuditRecord::new(
            if backward { "phase_rolled_back" } else { "phase_started" },
            None,
            json!({"phase": target, "fromPhase": from_phase}),
        ));

        Ok(Mutation::new((target.clone(), true), records))
    })?;

    let (name, changed) = result;
    if !changed {
        return Ok(Outcome::already_as_requested(
            json!({"currentPhase": name}),
            format!("phase '{name}' is already active"),
        ));
    }
    Ok(Outcome::with_message(
        json!({"currentPhase": name}),
        format!("phase set to '{name}'"),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{init_workspace, with};
    use super::*;

    #[test]
    fn forward_moves_complete_previous_phase() {
        let (_dir, ws, base) = init_workspace();
        set(&with(&base, json!({"target": "setup"}))).unwrap();
        set(&with(&base, json!({"target": "core"}))).unwrap();

        let todo = ws.load_todo().unwrap();
        assert_eq!(
            todo.project.phase("setup").unwrap().status,
            PhaseStatus::Completed
        );
        assert!(todo.project.phase("setup").unwrap().completed_at.is_some());
        assert_eq!(
            todo.project.phase("core").unwrap().status,
            PhaseStatus::Active
        );
        assert_eq!(todo.project.current_phase.as_deref(), Some("core"));

        let kinds: Vec<PhaseTransitionKind> = todo
            .project
            .phase_history
            .iter()
            .map(|t| t.transition)
            .collect();
        assert_eq!(
            kinds,
            vec![
                PhaseTransitionKind::Started,
                PhaseTransitionKind::Completed,
                PhaseTransitionKind::Started,
            ]
        );
    }

    #[test]
    fn backward_move_requires_rollback_and_force() {
        let (_dir, _ws, base) = init_workspace();
        set(&with(&base, json!({"target": "setup"}))).unwrap();
        set(&with(&base, json!({"target": "core"}))).unwrap();

        let err = set(&with(&base, json!({"target": "setup"}))).unwrap_err();
        assert_eq!(err.code(), 9);
        assert_eq!(err.name(), "PHASE_ROLLBACK_REQUIRES_FORCE");

        // --rollback without confirmation path still refuses.
        let err = set(&with(&base, json!({"target": "setup", "rollback": true}))).unwrap_err();
        assert_eq!(err.code(), 9);
    }

    #[test]
    fn forced_rollback_records_history_and_reopens_phase() {
        let (_dir, ws, base) = init_workspace();
        set(&with(&base, json!({"target": "setup"}))).unwrap();
        set(&with(&base, json!({"target": "core"}))).unwrap();
        set(&with(
            &base,
            json!({"target": "setup", "rollback": true, "force": true, "reason": "bad cut"}),
        ))
        .unwrap();

        let todo = ws.load_todo().unwrap();
        assert_eq!(todo.project.current_phase.as_deref(), Some("setup"));
        assert_eq!(
            todo.project.phase("core").unwrap().status,
            PhaseStatus::Pending
        );

        let last = todo.project.phase_history.last().unwrap();
        assert_eq!(last.transition, PhaseTransitionKind::RolledBack);
        assert_eq!(last.reason.as_deref(), Some("bad cut"));
        // History from before the rollback is preserved.
        assert!(todo.project.phase_history.len() >= 4);
    }

    #[test]
    fn interactive_rollback_skips_force() {
        let (_dir, _ws, base) = init_workspace();
        set(&with(&base, json!({"target": "setup"}))).unwrap();
        set(&with(&base, json!({"target": "core"}))).unwrap();
        set(&with(
            &base,
            json!({"target": "setup", "rollback": true, "interactive": true}),
        ))
        .unwrap();
    }

    #[test]
    fn same_phase_is_exit_102() {
        let (_dir, _ws, base) = init_workspace();
        set(&with(&base, json!({"target": "setup"}))).unwrap();
        let outcome = set(&with(&base, json!({"target": "setup"}))).unwrap();
        assert_eq!(outcome.exit_override, Some(102));
    }

    #[test]
    fn show_lists_phases_in_order_with_counts() {
        let (_dir, _ws, base) = init_workspace();
        set(&with(&base, json!({"target": "setup"}))).unwrap();
        super::super::add::run(&with(&base, json!({"title": "t"}))).unwrap();

        let outcome = show(&base).unwrap();
        assert_eq!(outcome.data["phases"][0]["name"], json!("setup"));
        assert_eq!(outcome.data["phases"][0]["taskCount"], json!(1));
        assert_eq!(outcome.data["currentPhase"], json!("setup"));
    }
}
