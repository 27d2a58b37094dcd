use chrono::Utc;
use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::model::{Kind, Priority, Size, Task, format_task_id};
use crate::project::TodoFile;
use crate::store::workspace::Mutation;

use super::{
    opt_str, opt_task_id, parse_enum, require_str, str_list, task_id_list, task_json, workspace,
};

/// Phase inheritance for new tasks: explicit flag, then the focus
/// task's phase, then the most-active phase, then the project's
/// current phase, then the configured default. Most-active ties break
/// by phase order ascending.
fn inherit_phase(todo: &TodoFile, explicit: Option<String>, config_default: Option<&str>) -> Option<String> {
    if let Some(phase) = explicit {
        return Some(phase);
    }
    if let Some(focus_id) = todo.focus.task_id
        && let Some(task) = todo.task(focus_id)
        && let Some(phase) = &task.phase
    {
        return Some(phase.clone());
    }
    if let Some(phase) = most_active_phase(todo) {
        return Some(phase);
    }
    if let Some(current) = &todo.project.current_phase {
        return Some(current.clone());
    }
    config_default.map(|p| p.to_string())
}

fn most_active_phase(todo: &TodoFile) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;
    for phase in todo.project.phases_in_order() {
        let open = todo
            .tasks
            .iter()
            .filter(|t| {
                t.phase.as_deref() == Some(phase.name.as_str())
                    && !matches!(t.status, crate::model::Status::Done | crate::model::Status::Cancelled)
            })
            .count();
        if open == 0 {
            continue;
        }
        // Strictly-greater keeps the earliest phase on ties.
        if best.is_none_or(|(count, _)| open > count) {
            best = Some((open, phase.name.as_str()));
        }
    }
    best.map(|(_, name)| name.to_string())
}

pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    super::require_session(&ws)?;
    let title = require_str(params, "title")?;
    let description = opt_str(params, "description");
    let priority = parse_enum::<Priority>(params, "priority")?.unwrap_or_default();
    let size = parse_enum::<Size>(params, "size")?.unwrap_or_default();
    let kind = parse_enum::<Kind>(params, "kind")?;
    let parent = opt_task_id(params, "parent")?;
    let depends = task_id_list(params, "depends")?;
    let labels = str_list(params, "labels");
    let files = str_list(params, "files");
    let acceptance = str_list(params, "acceptance");
    let explicit_phase = opt_str(params, "phase");
    let agent = opt_str(params, "agent");

    let config_default = ws.config.defaults.phase.clone();

    let task = ws.mutate_todo_with_sequence(|todo, sequence| {
        if let Some(pid) = parent {
            todo.require_task(pid)?;
        }
        for &dep in &depends {
            todo.require_task(dep)?;
        }
        if let Some(phase) = &explicit_phase
            && todo.project.phase(phase).is_none()
        {
            return Err(CleoError::PhaseNotFound(phase.clone()));
        }

        // The counter never reissues an id that already exists.
        let observed_max = todo.max_task_id();
        if sequence.counter < observed_max {
            sequence.repair_to(observed_max)?;
        }
        let id = sequence.allocate();

        let now = Utc::now();
        let mut task = Task::new(id, title.clone(), now);
        task.description = description.clone();
        task.priority = priority;
        task.size = size;
        task.kind = kind;
        task.parent_id = parent;
        task.depends = depends.clone();
        task.labels = labels.clone();
        task.files = files.clone();
        task.acceptance = acceptance.clone();
        task.phase = inherit_phase(todo, explicit_phase.clone(), config_default.as_deref());
        task.created_by = agent.clone();
        task.normalize();

        let record = AuditRecord::new(
            "task_added",
            Some(id),
            json!({"title": task.title, "phase": task.phase}),
        );
        todo.tasks.push(task.clone());
        Ok(Mutation::single(task, record))
    })?;

    Ok(Outcome::with_message(
        task_json(&task),
        format!("created {}", format_task_id(task.id)),
    ))
}
