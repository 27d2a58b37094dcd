#[cfg_attr(not(test), allow(unused_imports))]
use serde_json::{Value, json};

use crate::error::Result;
use crate::gateway::Outcome;
use crate::model::{Status, Task, format_task_id};
use crate::project::TodoFile;

use super::{task_json, workspace};

fn unblocked(task: &Task, todo: &TodoFile) -> bool {
    if !task.blocked_by.is_empty() {
        return false;
    }
    task.depends.iter().all(|&dep| {
        todo.task(dep)
            .is_none_or(|t| matches!(t.status, Status::Done | Status::Cancelled))
    })
}

/// Suggest the highest-scoring pending or active task whose
/// dependencies are all resolved.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let todo = ws.load_todo()?;

    let mut candidates: Vec<&Task> = todo
        .tasks
        .iter()
        .filter(|t| matches!(t.status, Status::Pending | Status::Active))
        .filter(|t| unblocked(t, &todo))
        .collect();
    candidates.sort_by(|a, b| b.score().cmp(&a.score()).then(a.id.cmp(&b.id)));

    match candidates.first() {
        Some(task) => Ok(Outcome::with_message(
            task_json(task),
            format!("next: {} ({})", format_task_id(task.id), task.title),
        )),
        None => Ok(Outcome::no_data("no unblocked task available")),
    }
}
