use serde_json::{Value, json};

use crate::error::Result;
use crate::gateway::Outcome;
use crate::graph::Hierarchy;
use crate::model::format_task_id;
use crate::project::TodoFile;

use super::{opt_task_id, workspace};

fn node(todo: &TodoFile, hierarchy: &Hierarchy, id: u64) -> Value {
    let task = todo.task(id);
    let children: Vec<Value> = hierarchy
        .children_of(id)
        .iter()
        .map(|&child| node(todo, hierarchy, child))
        .collect();
    json!({
        "id": format_task_id(id),
        "title": task.map(|t| t.title.clone()).unwrap_or_default(),
        "status": task.map(|t| t.status.to_string()).unwrap_or_default(),
        "children": children,
    })
}

/// Parent/child hierarchy projection, optionally rooted at one task.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let todo = ws.load_todo()?;
    let hierarchy = Hierarchy::build(&todo.tasks);

    let roots: Vec<u64> = match opt_task_id(params, "root")? {
        Some(id) => {
            todo.require_task(id)?;
            vec![id]
        }
        None => {
            let mut roots: Vec<u64> = todo
                .tasks
                .iter()
                .filter(|t| t.parent_id.is_none())
                .map(|t| t.id)
                .collect();
            roots.sort_unstable();
            roots
        }
    };

    let rendered: Vec<Value> = roots
        .iter()
        .map(|&id| node(&todo, &hierarchy, id))
        .collect();
    Ok(Outcome::data(json!({"roots": rendered})))
}
