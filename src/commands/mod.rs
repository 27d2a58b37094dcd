pub mod add;
pub mod archive;
pub mod checkpoint;
pub mod complete;
pub mod context;
pub mod delete;
pub mod deps;
pub mod external;
pub mod find;
pub mod focus;
pub mod init;
pub mod list;
pub mod log;
pub mod migrate_storage;
pub mod next;
pub mod phase;
pub mod sequence;
pub mod session;
pub mod show;
pub mod tree;
pub mod update;
pub mod upgrade;
pub mod validate;
pub mod verify;

use std::path::Path;

use serde_json::Value;

use crate::error::{CleoError, Result};
use crate::model::parse_task_id;
use crate::store::workspace::Workspace;

/// Resolve the workspace: explicit `root` param (transports and tests)
/// or project discovery from the environment.
pub(crate) fn workspace(params: &Value) -> Result<Workspace> {
    match params.get("root").and_then(|v| v.as_str()) {
        Some(root) => Workspace::open(Path::new(root)),
        None => Workspace::discover(),
    }
}

/// Enforce `session.requireSession`: task mutations need an active
/// current session when the policy is on.
pub(crate) fn require_session(ws: &Workspace) -> Result<()> {
    if !ws.config.session.require_session {
        return Ok(());
    }
    let sessions = ws.load_sessions()?;
    let active = sessions
        .current_session_id
        .as_ref()
        .and_then(|id| sessions.session(id))
        .is_some_and(|s| s.status == crate::session::SessionStatus::Active);
    if active {
        Ok(())
    } else {
        Err(CleoError::InvalidInput(
            "session.requireSession is set; start a session first (`cleo session start <name>`)"
                .into(),
        ))
    }
}

pub(crate) fn require_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CleoError::InvalidInput(format!("missing required parameter '{key}'")))
}

pub(crate) fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub(crate) fn opt_bool(params: &Value, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

pub(crate) fn opt_u64(params: &Value, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

pub(crate) fn str_list(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Required task id parameter, accepting `T001` or bare numeric forms.
pub(crate) fn task_id(params: &Value, key: &str) -> Result<u64> {
    if let Some(id) = params.get(key).and_then(|v| v.as_u64()) {
        return Ok(id);
    }
    parse_task_id(&require_str(params, key)?)
}

pub(crate) fn opt_task_id(params: &Value, key: &str) -> Result<Option<u64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_u64()),
        Some(Value::String(s)) => Ok(Some(parse_task_id(s)?)),
        Some(other) => Err(CleoError::InvalidInput(format!(
            "invalid task id parameter '{key}': {other}"
        ))),
    }
}

pub(crate) fn task_id_list(params: &Value, key: &str) -> Result<Vec<u64>> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    let mut ids = Vec::new();
    for item in items {
        match item {
            Value::Number(n) => {
                ids.push(n.as_u64().ok_or_else(|| {
                    CleoError::InvalidInput(format!("invalid task id in '{key}'"))
                })?);
            }
            Value::String(s) => ids.push(parse_task_id(s)?),
            other => {
                return Err(CleoError::InvalidInput(format!(
                    "invalid task id in '{key}': {other}"
                )));
            }
        }
    }
    Ok(ids)
}

pub(crate) fn parse_enum<T: clap::ValueEnum + Send + Sync + 'static>(
    params: &Value,
    key: &str,
) -> Result<Option<T>> {
    match params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => T::from_str(raw, true)
            .map(Some)
            .map_err(|_| CleoError::InvalidInput(format!("invalid value '{raw}' for '{key}'"))),
    }
}

pub(crate) fn task_json(task: &crate::model::Task) -> Value {
    let mut value = serde_json::to_value(task).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "displayId".into(),
            Value::String(crate::model::format_task_id(task.id)),
        );
    }
    value
}
