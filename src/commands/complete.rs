use chrono::Utc;
use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::model::{Status, format_task_id};
use crate::project::{PhaseStatus, PhaseTransition, PhaseTransitionKind, TodoFile};
use crate::store::workspace::Mutation;

use super::{opt_str, task_id, task_json, workspace};

fn phase_is_drained(todo: &TodoFile, phase: &str) -> bool {
    !todo.tasks.iter().any(|t| {
        t.phase.as_deref() == Some(phase)
            && !matches!(t.status, Status::Done | Status::Cancelled)
    })
}

/// Complete the owning phase when its last open task finishes, then
/// activate the next phase by order. Returns the extra audit records.
fn roll_phase_forward(todo: &mut TodoFile, phase_name: &str) -> Vec<AuditRecord> {
    let mut records = Vec::new();
    let now = Utc::now();

    let is_active = todo
        .project
        .phase(phase_name)
        .is_some_and(|p| p.status == PhaseStatus::Active);
    if !is_active || !phase_is_drained(todo, phase_name) {
        return records;
    }

    let task_count = todo
        .tasks
        .iter()
        .filter(|t| t.phase.as_deref() == Some(phase_name))
        .count();

    if let Some(phase) = todo.project.phase_mut(phase_name) {
        phase.status = PhaseStatus::Completed;
        phase.completed_at = Some(now);
    }
    todo.project.phase_history.push(PhaseTransition {
        phase: phase_name.to_string(),
        transition: PhaseTransitionKind::Completed,
        timestamp: now,
        from_phase: None,
        task_count,
        reason: Some("all tasks done".into()),
    });
    records.push(AuditRecord::new(
        "phase_completed",
        None,
        json!({"phase": phase_name}),
    ));

    let next = todo
        .project
        .phases_in_order()
        .into_iter()
        .find(|p| p.status == PhaseStatus::Pending)
        .map(|p| p.name.clone());
    if let Some(next_name) = next {
        let next_count = todo
            .tasks
            .iter()
            .filter(|t| t.phase.as_deref() == Some(next_name.as_str()))
            .count();
        if let Some(phase) = todo.project.phase_mut(&next_name) {
            phase.status = PhaseStatus::Active;
            phase.started_at = Some(now);
        }
        todo.project.current_phase = Some(next_name.clone());
        todo.project.phase_history.push(PhaseTransition {
            phase: next_name.clone(),
            transition: PhaseTransitionKind::Started,
            timestamp: now,
            from_phase: Some(phase_name.to_string()),
            task_count: next_count,
            reason: None,
        });
        records.push(AuditRecord::new(
            "phase_started",
            None,
            json!({"phase": next_name, "fromPhase": phase_name}),
        ));
    }
    records
}

pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    super::require_session(&ws)?;
    let id = task_id(params, "id")?;
    let note = opt_str(params, "note");
    let agent = opt_str(params, "agent");

    let (task, phase_rolled) = ws.mutate_todo(|todo| {
        let now = Utc::now();
        {
            let task = todo.require_task_mut(id)?;
            if task.status == Status::Done {
                return Err(CleoError::InvalidTransition("done".into(), "done".into()));
            }
            if task.status == Status::Cancelled {
                return Err(CleoError::InvalidTransition(
                    "cancelled".into(),
                    "done".into(),
                ));
            }
            task.status = Status::Done;
            task.completed_at = Some(now);
            task.updated_at = now;
            if let Some(text) = &note {
                task.add_note(text.clone(), agent.clone(), now);
            }
        }

        let mut records = vec![AuditRecord::new(
            "task_completed",
            Some(id),
            json!({"note": note}),
        )];

        let owning_phase = todo.task(id).and_then(|t| t.phase.clone());
        let mut rolled = false;
        if let Some(phase) = owning_phase {
            let extra = roll_phase_forward(todo, &phase);
            rolled = !extra.is_empty();
            records.extend(extra);
        }

        let snapshot = todo.task(id).unwrap().clone();
        Ok(Mutation::new((snapshot, rolled), records))
    })?;

    let mut message = format!("completed {}", format_task_id(id));
    if phase_rolled {
        message.push_str("; phase advanced");
    }
    Ok(Outcome::with_message(task_json(&task), message))
}
