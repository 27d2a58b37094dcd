use serde_json::{Value, json};

use crate::error::Result;
use crate::gateway::Outcome;

use super::{require_str, task_json, workspace};

/// Case-insensitive substring search over titles, descriptions, and
/// labels of live tasks.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let query = require_str(params, "query")?.to_lowercase();
    let todo = ws.load_todo()?;

    let hits: Vec<Value> = todo
        .tasks
        .iter()
        .filter(|t| {
            t.title.to_lowercase().contains(&query)
                || t.description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&query))
                || t.labels.iter().any(|l| l.to_lowercase().contains(&query))
        })
        .map(task_json)
        .collect();

    if hits.is_empty() {
        return Ok(Outcome::no_data(format!("no tasks match '{query}'")));
    }
    let count = hits.len();
    Ok(Outcome::data(json!({"tasks": hits, "count": count})))
}
