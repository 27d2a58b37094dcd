use serde_json::{Value, json};

use crate::audit;
use crate::error::Result;
use crate::gateway::Outcome;

use super::{opt_task_id, opt_u64, workspace};

/// Operation log, newest first, optionally filtered by task.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let task_filter = opt_task_id(params, "id")?;
    let limit = opt_u64(params, "limit").map(|l| l as usize);

    let mut records = audit::read_log(&ws.paths)?;
    if let Some(id) = task_filter {
        records.retain(|r| r.task_id == Some(id));
    }
    if let Some(limit) = limit {
        records.truncate(limit);
    }

    if records.is_empty() {
        return Ok(Outcome::no_data("no log entries"));
    }
    let count = records.len();
    Ok(Outcome::data(
        json!({"entries": serde_json::to_value(&records)?, "count": count}),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{init_workspace, with};
    use super::super::{add, complete};
    use super::*;

    #[test]
    fn log_is_newest_first_and_filterable() {
        let (_dir, _ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "a"}))).unwrap();
        add::run(&with(&base, json!({"title": "b"}))).unwrap();
        complete::run(&with(&base, json!({"id": 1}))).unwrap();

        let outcome = run(&base).unwrap();
        assert_eq!(outcome.data["count"], json!(3));
        assert_eq!(
            outcome.data["entries"][0]["operation"],
            json!("task_completed")
        );

        let outcome = run(&with(&base, json!({"id": 2}))).unwrap();
        assert_eq!(outcome.data["count"], json!(1));

        let outcome = run(&with(&base, json!({"limit": 1}))).unwrap();
        assert_eq!(outcome.data["count"], json!(1));
    }

    #[test]
    fn empty_log_is_exit_101() {
        let (_dir, _ws, base) = init_workspace();
        let outcome = run(&base).unwrap();
        assert_eq!(outcome.exit_override, Some(101));
    }
}
