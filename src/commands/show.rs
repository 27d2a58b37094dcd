use serde_json::Value;

use crate::error::Result;
use crate::gateway::Outcome;
use crate::graph::Hierarchy;
use crate::model::format_task_id;

use super::{task_id, task_json, workspace};

/// Single-task view, including hierarchy context and the archive as a
/// fallback for ids that were moved out of the live set.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let id = task_id(params, "id")?;
    let todo = ws.load_todo()?;

    if let Some(task) = todo.task(id) {
        let hierarchy = Hierarchy::build(&todo.tasks);
        let mut data = task_json(task);
        if let Some(obj) = data.as_object_mut() {
            obj.insert(
                "children".into(),
                serde_json::json!(
                    hierarchy
                        .children_of(id)
                        .iter()
                        .map(|&c| format_task_id(c))
                        .collect::<Vec<_>>()
                ),
            );
            obj.insert(
                "verified".into(),
                serde_json::json!(crate::verify::is_verified(&todo, &hierarchy, id)),
            );
        }
        return Ok(Outcome::data(data));
    }

    let archive = ws.load_archive()?;
    if let Some(task) = archive.tasks.iter().find(|t| t.id == id) {
        let mut data = task_json(task);
        if let Some(obj) = data.as_object_mut() {
            obj.insert("archived".into(), serde_json::json!(true));
        }
        return Ok(Outcome::data(data));
    }

    Err(crate::error::CleoError::TaskNotFound(format_task_id(id)))
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{init_workspace, with};
    use super::super::add;
    use super::*;
    use serde_json::json;

    #[test]
    fn shows_task_with_children() {
        let (_dir, _ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "parent"}))).unwrap();
        add::run(&with(&base, json!({"title": "child", "parent": 1}))).unwrap();

        let outcome = run(&with(&base, json!({"id": "T001"}))).unwrap();
        assert_eq!(outcome.data["children"], json!(["T002"]));
        assert_eq!(outcome.data["verified"], json!(false));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (_dir, _ws, base) = init_workspace();
        let err = run(&with(&base, json!({"id": "T099"}))).unwrap_err();
        assert_eq!(err.code(), 4);
    }
}
