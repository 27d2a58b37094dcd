use serde_json::{Value, json};

use crate::error::Result;
use crate::gateway::Outcome;
use crate::model::{Kind, Priority, Status, Task};

use super::{opt_bool, opt_str, parse_enum, task_json, workspace};

fn matches(task: &Task, params: &Value) -> Result<bool> {
    if let Some(status) = parse_enum::<Status>(params, "status")? {
        if task.status != status {
            return Ok(false);
        }
    } else if !opt_bool(params, "all")
        && matches!(task.status, Status::Done | Status::Cancelled)
    {
        return Ok(false);
    }
    if let Some(priority) = parse_enum::<Priority>(params, "priority")?
        && task.priority != priority
    {
        return Ok(false);
    }
    if let Some(kind) = parse_enum::<Kind>(params, "kind")?
        && task.kind != Some(kind)
    {
        return Ok(false);
    }
    if let Some(phase) = opt_str(params, "phase")
        && task.phase.as_deref() != Some(phase.as_str())
    {
        return Ok(false);
    }
    if let Some(label) = opt_str(params, "label")
        && !task.labels.iter().any(|l| l == &label)
    {
        return Ok(false);
    }
    Ok(true)
}

/// List live tasks. Done and cancelled tasks are hidden unless an
/// explicit status filter or `all` asks for them. `byScore` orders by
/// the weighting formula instead of id.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let todo = ws.load_todo()?;

    let mut tasks: Vec<&Task> = Vec::new();
    for task in &todo.tasks {
        if matches(task, params)? {
            tasks.push(task);
        }
    }

    if opt_bool(params, "byScore") {
        tasks.sort_by(|a, b| b.score().cmp(&a.score()).then(a.id.cmp(&b.id)));
    } else {
        tasks.sort_by_key(|t| t.id);
    }

    let rendered: Vec<Value> = tasks.iter().map(|t| task_json(t)).collect();
    let count = rendered.len();
    Ok(Outcome::data(json!({"tasks": rendered, "count": count})))
}
