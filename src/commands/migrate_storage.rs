use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::config::EngineKind;
use crate::error::Result;
use crate::gateway::Outcome;
use crate::store::migrate;

use super::{opt_bool, parse_enum, workspace};

/// Explicit storage-engine migration. `--dry-run` reports the
/// preflight; the apply path copies every aggregate, verifies counts,
/// and only then rewrites the config.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let to = parse_enum::<EngineKind>(params, "to")?.unwrap_or(EngineKind::Sqlite);
    let dry_run = opt_bool(params, "dryRun");

    let preflight = migrate::preflight(&ws.paths, &ws.config, to)?;
    if dry_run {
        return Ok(Outcome::with_message(
            serde_json::to_value(&preflight)?,
            format!("dry-run: {}", preflight.reason),
        ));
    }
    if !preflight.needed {
        return Ok(Outcome::no_change(
            serde_json::to_value(&preflight)?,
            preflight.reason.clone(),
        ));
    }

    let report = migrate::migrate(&ws.paths, &ws.config, to)?;
    crate::audit::append(
        &ws.paths,
        &AuditRecord::new(
            "storage_migrated",
            None,
            json!({"from": report.from.to_string(), "to": report.to.to_string()}),
        ),
    )?;
    Ok(Outcome::with_message(
        serde_json::to_value(&report)?,
        format!("migrated storage {} -> {}", report.from, report.to),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{init_workspace, with};
    use super::super::add;
    use super::*;
    use crate::store::workspace::Workspace;

    #[test]
    fn migrates_json_to_sqlite_and_back() {
        let (dir, _ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "carried"}))).unwrap();

        let outcome = run(&with(&base, json!({"to": "sqlite"}))).unwrap();
        assert_eq!(outcome.data["tasksMigrated"], json!(1));

        let ws = Workspace::open(dir.path()).unwrap();
        assert_eq!(ws.config.storage.engine, Some(EngineKind::Sqlite));
        assert_eq!(ws.load_todo().unwrap().tasks.len(), 1);

        let outcome = run(&with(&base, json!({"to": "json"}))).unwrap();
        assert_eq!(outcome.data["to"], json!("json"));
        let ws = Workspace::open(dir.path()).unwrap();
        assert_eq!(ws.config.storage.engine, Some(EngineKind::Json));
        assert_eq!(ws.load_todo().unwrap().tasks.len(), 1);
    }

    #[test]
    fn dry_run_only_reports() {
        let (dir, _ws, base) = init_workspace();
        let outcome = run(&with(&base, json!({"to": "sqlite", "dryRun": true}))).unwrap();
        assert_eq!(outcome.data["needed"], json!(true));

        let ws = Workspace::open(dir.path()).unwrap();
        assert_eq!(ws.config.storage.engine, None);
    }

    #[test]
    fn already_on_target_is_no_change() {
        let (_dir, _ws, base) = init_workspace();
        run(&with(&base, json!({"to": "sqlite"}))).unwrap();
        let outcome = run(&with(&base, json!({"to": "sqlite"}))).unwrap();
        assert!(outcome.no_change);
    }
}
