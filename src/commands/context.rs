use chrono::Utc;
use serde_json::{Value, json};

use crate::context::{self, ContextState, UsageLevel};
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;

use super::{opt_bool, opt_str, opt_u64, workspace};

fn session_id(params: &Value) -> String {
    opt_str(params, "sessionId")
        .or_else(crate::paths::env_session_id)
        .unwrap_or_else(|| "default".into())
}

/// Record one usage sample from the host runtime into the per-session
/// context state file.
pub fn report(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let window = opt_u64(params, "contextWindowSize").ok_or_else(|| {
        CleoError::InvalidInput("missing required parameter 'contextWindowSize'".into())
    })?;
    let usage = opt_u64(params, "currentUsage").ok_or_else(|| {
        CleoError::InvalidInput("missing required parameter 'currentUsage'".into())
    })?;

    let state = ContextState {
        session_id: session_id(params),
        context_window_size: window,
        current_usage: usage,
        recorded_at: Utc::now(),
    };
    context::write_state(&ws.paths, &state)?;

    let percent = state.percent();
    let level = context::classify(percent);
    Ok(Outcome::with_message(
        json!({"sessionId": state.session_id, "percent": percent, "level": level.to_string()}),
        format!("recorded {percent:.1}% usage ({level})"),
    ))
}

/// Evaluate the recorded usage against the thresholds. Anything past
/// `ok` surfaces as a CONTEXT_* signal whose code is the exit code;
/// stale or missing state maps to the stale signal.
pub fn status(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let session = session_id(params);
    let now = Utc::now();

    let Some(state) = context::read_state(&ws.paths, &session)? else {
        return Err(CleoError::ContextStale);
    };
    if state.is_stale(now) {
        return Err(CleoError::ContextStale);
    }

    let percent = state.percent();
    let level = context::classify(percent);

    let alerted = if opt_bool(params, "alert") {
        context::should_alert(&ws.paths, &ws.config, &session, level, now)?
    } else {
        false
    };

    if level != UsageLevel::Ok {
        return Err(CleoError::ContextThreshold {
            level: level.to_string(),
            percent,
        });
    }
    Ok(Outcome::with_message(
        json!({"sessionId": session, "percent": percent, "level": "ok", "alerted": alerted}),
        format!("context at {percent:.1}%"),
    ))
}

/// HITL lock-awareness scan over `.cleo/*.lock`.
pub fn locks(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let warnings = context::scan_locks(&ws.paths, &ws.config)?;
    let blocking = warnings
        .iter()
        .filter(|w| w.severity == context::WarnSeverity::Block)
        .count();

    if warnings.is_empty() {
        return Ok(Outcome::with_message(
            json!({"locks": [], "blocking": 0}),
            "no lock contention",
        ));
    }
    let count = warnings.len();
    Ok(Outcome::with_message(
        json!({"locks": serde_json::to_value(&warnings)?, "blocking": blocking}),
        format!("{count} lock(s) observed, {blocking} blocking"),
    ))
}
