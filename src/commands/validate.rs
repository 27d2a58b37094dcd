use chrono::Utc;
use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::schema::{self, IssueLevel};
use crate::store::workspace::Mutation;
use crate::{context, platform};

use super::{opt_bool, workspace};

fn issues_json(issues: &[schema::Issue]) -> Value {
    serde_json::to_value(issues).unwrap_or(Value::Null)
}

/// Permissive validation scan. With `strict`, error-level drift turns
/// into a VALIDATION_ERROR instead of a report.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let todo = ws.load_todo()?;
    let raw = if ws.paths.todo_file().exists() {
        Some(crate::store::atomic::read_json::<Value>(&ws.paths.todo_file())?)
    } else {
        None
    };
    let archive = ws.load_archive()?;
    let archive_ids: Vec<u64> = archive.tasks.iter().map(|t| t.id).collect();
    let sequence = ws.load_sequence()?;

    let issues = schema::scan(&todo, raw.as_ref(), &archive_ids, &sequence);
    let errors = issues
        .iter()
        .filter(|i| i.level == IssueLevel::Error)
        .count();
    let warnings = issues.len() - errors;

    if opt_bool(params, "strict") && errors > 0 {
        return Err(CleoError::ValidationError(format!(
            "{errors} error-level issue(s); run `cleo validate --fix`"
        )));
    }

    if issues.is_empty() {
        return Ok(Outcome::with_message(
            json!({"issues": [], "errors": 0, "warnings": 0}),
            "state is clean",
        ));
    }
    Ok(Outcome::with_message(
        json!({"issues": issues_json(&issues), "errors": errors, "warnings": warnings}),
        format!("{errors} error(s), {warnings} warning(s)"),
    ))
}

/// Apply the structural repairs behind `--fix`; `--dry-run` previews
/// the same actions without writing.
pub fn fix(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let dry_run = opt_bool(params, "dryRun");
    let archive = ws.load_archive()?;
    let archive_ids: Vec<u64> = archive.tasks.iter().map(|t| t.id).collect();

    if dry_run {
        let mut todo = ws.load_todo()?;
        let mut sequence = ws.load_sequence()?;
        let mut actions = schema::repair(&mut todo, &mut sequence, &archive_ids, Utc::now());
        for action in &mut actions {
            action.status = "preview";
        }
        let count = actions.len();
        return Ok(Outcome::with_message(
            json!({"actions": serde_json::to_value(&actions)?}),
            format!("dry-run: {count} repair(s) pending"),
        ));
    }

    let actions = ws.mutate_todo_with_sequence(|todo, sequence| {
        let actions = schema::repair(todo, sequence, &archive_ids, Utc::now());
        let records = if actions.is_empty() {
            vec![]
        } else {
            vec![AuditRecord::new(
                "validate_fix",
                None,
                json!({"applied": actions.len()}),
            )]
        };
        Ok(Mutation::new(actions, records))
    })?;

    if actions.is_empty() {
        return Ok(Outcome::no_change(json!({"actions": []}), "nothing to repair"));
    }
    let count = actions.len();
    Ok(Outcome::with_message(
        json!({"actions": serde_json::to_value(&actions)?}),
        format!("applied {count} repair(s)"),
    ))
}

/// Doctor: the validation scan plus environment and lock-awareness
/// checks. Advisory unless `strict` is passed.
pub fn doctor(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let scan = run(params)?;

    let lock_warnings = context::scan_locks(&ws.paths, &ws.config)?;
    let blocked = lock_warnings
        .iter()
        .any(|w| w.severity == context::WarnSeverity::Block);

    let home = crate::paths::cleo_home();
    let env_checks = json!([
        {
            "category": "environment",
            "level": "ok",
            "message": format!("storage engine: {}", ws.config.storage.engine.unwrap_or_default()),
        },
        {
            "category": "environment",
            "level": if platform::tool_available("sqlite3") { "ok" } else { "warn" },
            "message": "sqlite3 tool on PATH",
        },
        {
            "category": "environment",
            "level": if home.is_dir() { "ok" } else { "warn" },
            "message": format!("global registry at {}", home.display()),
        },
    ]);

    if opt_bool(params, "strict") && blocked {
        return Err(CleoError::ValidationError(
            "lock-awareness reported a blocking contention".into(),
        ));
    }

    Ok(Outcome::data(json!({
        "validation": scan.data,
        "locks": serde_json::to_value(&lock_warnings)?,
        "environment": env_checks,
    })))
}
