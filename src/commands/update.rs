use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::graph;
use crate::model::{Kind, Priority, Size, Status, format_task_id};
use crate::store::workspace::Mutation;

use super::{opt_str, opt_task_id, parse_enum, task_id, task_id_list, task_json, workspace};

/// Partial update. Dependency and parent changes are validated against
/// the live graph before anything is written; the audit record carries
/// a field-level diff.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    super::require_session(&ws)?;
    let id = task_id(params, "id")?;

    let title = opt_str(params, "title");
    let description = opt_str(params, "description");
    let status = parse_enum::<Status>(params, "status")?;
    let priority = parse_enum::<Priority>(params, "priority")?;
    let size = parse_enum::<Size>(params, "size")?;
    let kind = parse_enum::<Kind>(params, "kind")?;
    let phase = opt_str(params, "phase");
    let parent = if params.get("parent").is_some() {
        Some(opt_task_id(params, "parent")?)
    } else {
        None
    };
    let depends = if params.get("depends").is_some() {
        Some(task_id_list(params, "depends")?)
    } else {
        None
    };
    let labels = params.get("labels").map(|_| super::str_list(params, "labels"));
    let note = opt_str(params, "note");
    let agent = opt_str(params, "agent");

    let (task, diff) = ws.mutate_todo(|todo| {
        todo.require_task(id)?;

        if let Some(Some(new_parent)) = parent {
            todo.require_task(new_parent)?;
            let mut probe = todo.clone();
            probe.task_mut(id).unwrap().parent_id = Some(new_parent);
            let hierarchy = graph::Hierarchy::build(&probe.tasks);
            if hierarchy.has_parent_cycle(id) {
                return Err(CleoError::CycleDetected(format!(
                    "{} parent chain loops",
                    format_task_id(id)
                )));
            }
        }
        if let Some(new_deps) = &depends {
            for &dep in new_deps {
                if dep != id {
                    todo.require_task(dep)?;
                }
            }
            let mut adjacency = graph::dependency_adjacency(&todo.tasks);
            adjacency.entry(id).or_default().clear();
            graph::validate_new_edges(id, new_deps, &mut adjacency)?;
        }
        if let Some(new_phase) = &phase
            && todo.project.phase(new_phase).is_none()
        {
            return Err(CleoError::PhaseNotFound(new_phase.clone()));
        }

        let now = Utc::now();
        let mut diff = Map::new();
        let task = todo.task_mut(id).unwrap();

        let mut record_change = |field: &str, from: Value, to: Value| {
            if from != to {
                diff.insert(field.to_string(), json!({"from": from, "to": to}));
            }
        };

        if let Some(new_title) = &title {
            record_change("title", json!(task.title), json!(new_title));
            task.title = new_title.clone();
        }
        if let Some(new_description) = &description {
            record_change("description", json!(task.description), json!(new_description));
            task.description = Some(new_description.clone());
        }
        if let Some(new_status) = status {
            record_change("status", json!(task.status), json!(new_status));
            task.status = new_status;
            match new_status {
                Status::Done if task.completed_at.is_none() => task.completed_at = Some(now),
                Status::Cancelled if task.cancelled_at.is_none() => {
                    task.cancelled_at = Some(now)
                }
                _ => {}
            }
        }
        if let Some(new_priority) = priority {
            record_change("priority", json!(task.priority), json!(new_priority));
            task.priority = new_priority;
        }
        if let Some(new_size) = size {
            record_change("size", json!(task.size), json!(new_size));
            task.size = new_size;
        }
        if let Some(new_kind) = kind {
            record_change("kind", json!(task.kind), json!(new_kind));
            task.kind = Some(new_kind);
        }
        if let Some(new_phase) = &phase {
            record_change("phase", json!(task.phase), json!(new_phase));
            task.phase = Some(new_phase.clone());
        }
        if let Some(new_parent) = parent {
            record_change("parentId", json!(task.parent_id), json!(new_parent));
            task.parent_id = new_parent;
        }
        if let Some(new_deps) = &depends {
            record_change("depends", json!(task.depends), json!(new_deps));
            task.depends = new_deps.clone();
        }
        if let Some(new_labels) = &labels {
            record_change("labels", json!(task.labels), json!(new_labels));
            task.labels = new_labels.clone();
        }
        if let Some(text) = &note {
            task.add_note(text.clone(), agent.clone(), now);
            diff.insert("notes".into(), json!({"appended": text}));
        }

        if diff.is_empty() {
            let snapshot = task.clone();
            return Ok(Mutation::new((snapshot, diff), vec![]));
        }

        task.updated_at = now;
        task.normalize();
        let snapshot = task.clone();
        let record = AuditRecord::new("task_updated", Some(id), json!({"diff": diff}));
        Ok(Mutation::single((snapshot, diff), record))
    })?;

    if diff.is_empty() {
        return Ok(Outcome::no_change(
            task_json(&task),
            format!("{} unchanged", format_task_id(id)),
        ));
    }
    Ok(Outcome::with_message(
        task_json(&task),
        format!("updated {}", format_task_id(id)),
    ))
}
