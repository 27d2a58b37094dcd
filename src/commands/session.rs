use chrono::Utc;
use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::session::{Session, SessionScope, SessionStatus, is_orphaned};
use crate::store::workspace::Mutation;

use super::{opt_str, require_str, workspace};

fn session_json(session: &Session) -> Result<Value> {
    Ok(serde_json::to_value(session)?)
}

/// Start a session and make it current. The session id is assigned
/// here and persisted in the aggregate; the environment variable is
/// read-only context.
pub fn start(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let name = require_str(params, "name")?;
    let scope = match opt_str(params, "scope") {
        Some(raw) => SessionScope::parse(&raw)?,
        None => SessionScope::Global,
    };
    let agent = opt_str(params, "agent");
    let note = opt_str(params, "note");

    if ws.config.session.require_session_note && note.is_none() {
        return Err(CleoError::InvalidInput(
            "session.requireSessionNote is set; pass a start note".into(),
        ));
    }

    if let SessionScope::Epic(epic_id) = scope {
        let todo = ws.load_todo()?;
        todo.require_task(epic_id)?;
    }

    let session = ws.mutate_sessions(|sessions| {
        let mut session = Session::new(name.clone(), scope.clone(), Utc::now());
        session.agent = agent.clone();
        sessions.current_session_id = Some(session.id.clone());
        sessions.sessions.push(session.clone());
        let record = AuditRecord::new(
            "session_started",
            None,
            json!({"sessionId": session.id, "name": name, "scope": scope.to_string()}),
        );
        Ok(Mutation::single(session, record))
    })?;

    crate::audit::append_metric(
        &ws.paths,
        "SESSIONS",
        &json!({"event": "start", "sessionId": session.id, "timestamp": crate::platform::now_string()}),
    )?;

    Ok(Outcome::with_message(
        session_json(&session)?,
        format!("session '{}' started", session.name),
    ))
}

/// End the selected session (or the current one) with an optional note.
pub fn end(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let selector = opt_str(params, "session");
    let note = opt_str(params, "note");

    let session = ws.mutate_sessions(|sessions| {
        let id = match &selector {
            Some(sel) => sessions.resolve(sel)?.id.clone(),
            None => sessions
                .current_session_id
                .clone()
                .ok_or_else(|| CleoError::SessionNotFound("current".into()))?,
        };
        let now = Utc::now();
        let session = sessions
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CleoError::SessionNotFound(id.clone()))?;
        if session.status == SessionStatus::Ended {
            return Err(CleoError::InvalidTransition("ended".into(), "ended".into()));
        }
        session.status = SessionStatus::Ended;
        session.ended_at = Some(now);
        session.end_note = note.clone();
        let snapshot = session.clone();
        if sessions.current_session_id.as_deref() == Some(id.as_str()) {
            sessions.current_session_id = None;
        }
        let record = AuditRecord::new("session_ended", None, json!({"sessionId": id}));
        Ok(Mutation::single(snapshot, record))
    })?;

    crate::audit::append_metric(
        &ws.paths,
        "SESSIONS",
        &json!({"event": "end", "sessionId": session.id, "timestamp": crate::platform::now_string()}),
    )?;

    // Session-end archiving is best-effort; a failed sweep never blocks
    // ending the session.
    if ws.config.archive.archive_on_session_end {
        let _ = super::archive::run(params);
    }

    Ok(Outcome::with_message(
        session_json(&session)?,
        format!("session '{}' ended", session.name),
    ))
}

/// Reactivate an ended or orphaned session and make it current again.
pub fn resume(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let selector = require_str(params, "session")?;

    let session = ws.mutate_sessions(|sessions| {
        let id = sessions.resolve(&selector)?.id.clone();
        let session = sessions
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CleoError::SessionNotFound(id.clone()))?;
        session.status = SessionStatus::Active;
        session.ended_at = None;
        session.pid = Some(std::process::id());
        let snapshot = session.clone();
        sessions.current_session_id = Some(id.clone());
        let record = AuditRecord::new("session_resumed", None, json!({"sessionId": id}));
        Ok(Mutation::single(snapshot, record))
    })?;

    Ok(Outcome::with_message(
        session_json(&session)?,
        format!("session '{}' resumed", session.name),
    ))
}

pub fn list(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let sessions = ws.load_sessions()?;
    let rendered: Vec<Value> = sessions
        .sessions
        .iter()
        .map(|s| session_json(s).unwrap_or(Value::Null))
        .collect();
    let count = rendered.len();
    Ok(Outcome::data(json!({
        "sessions": rendered,
        "count": count,
        "currentSessionId": sessions.current_session_id,
    })))
}

/// Mark as orphaned every active session whose recorded process is
/// dead, or which exceeded the configured max age.
pub fn gc(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let max_age = ws.config.session.max_age_hours;

    let orphaned = ws.mutate_sessions(|sessions| {
        let now = Utc::now();
        let mut orphaned = Vec::new();
        for session in &mut sessions.sessions {
            if is_orphaned(session, now, max_age) {
                session.status = SessionStatus::Orphaned;
                session.ended_at = Some(now);
                orphaned.push(session.id.clone());
            }
        }
        if sessions
            .current_session_id
            .as_ref()
            .is_some_and(|id| orphaned.contains(id))
        {
            sessions.current_session_id = None;
        }
        let records = if orphaned.is_empty() {
            vec![]
        } else {
            vec![AuditRecord::new(
                "sessions_gc",
                None,
                json!({"orphaned": orphaned}),
            )]
        };
        Ok(Mutation::new(orphaned, records))
    })?;

    if orphaned.is_empty() {
        return Ok(Outcome::no_change(
            json!({"orphaned": []}),
            "no orphaned sessions",
        ));
    }
    let count = orphaned.len();
    Ok(Outcome::with_message(
        json!({"orphaned": orphaned}),
        format!("marked {count} session(s) orphaned"),
    ))
}
