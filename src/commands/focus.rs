use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::Result;
use crate::gateway::Outcome;
use crate::model::format_task_id;
use crate::store::workspace::Mutation;

use super::{opt_str, task_id, workspace};

/// Bind focus to a task. Focus is advisory; it never changes task
/// status, only phase inheritance and `next` weighting.
pub fn set(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let id = task_id(params, "id")?;
    let session_id = opt_str(params, "sessionId").or_else(crate::paths::env_session_id);

    let focus = ws.mutate_todo(|todo| {
        todo.require_task(id)?;
        if todo.focus.task_id == Some(id) {
            return Ok(Mutation::new((todo.focus.clone(), false), vec![]));
        }
        todo.focus.task_id = Some(id);
        todo.focus.session_id = session_id.clone();
        let record = AuditRecord::new("focus_set", Some(id), json!({"sessionId": session_id}));
        Ok(Mutation::single((todo.focus.clone(), true), record))
    })?;

    let (focus, changed) = focus;
    let data = serde_json::to_value(&focus)?;
    if !changed {
        return Ok(Outcome::already_as_requested(
            data,
            format!("focus already on {}", format_task_id(id)),
        ));
    }
    Ok(Outcome::with_message(
        data,
        format!("focus set to {}", format_task_id(id)),
    ))
}

pub fn clear(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let cleared = ws.mutate_todo(|todo| {
        if todo.focus.task_id.is_none() {
            return Ok(Mutation::new(false, vec![]));
        }
        let previous = todo.focus.task_id;
        todo.focus.task_id = None;
        todo.focus.note = None;
        let record = AuditRecord::new("focus_cleared", previous, json!({}));
        Ok(Mutation::single(true, record))
    })?;

    if !cleared {
        return Ok(Outcome::no_change(json!({}), "no focus was set"));
    }
    Ok(Outcome::with_message(json!({}), "focus cleared"))
}

pub fn note(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let text = super::require_str(params, "note")?;

    let focus = ws.mutate_todo(|todo| {
        todo.focus.note = Some(text.clone());
        let record = AuditRecord::new("focus_note", todo.focus.task_id, json!({"note": text}));
        Ok(Mutation::single(todo.focus.clone(), record))
    })?;

    Ok(Outcome::with_message(
        serde_json::to_value(&focus)?,
        "focus note recorded",
    ))
}
