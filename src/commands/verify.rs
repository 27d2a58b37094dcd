use chrono::Utc;
use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::graph::Hierarchy;
use crate::model::format_task_id;
use crate::store::workspace::Mutation;
use crate::verify::{self, SYSTEM_AGENT};

use super::{opt_bool, opt_str, require_str, task_id, workspace};

/// Set one verification gate. Round exhaustion persists its failure
/// log entry before the error surfaces.
pub fn set(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let id = task_id(params, "id")?;
    let gate = require_str(params, "gate")?;
    let value = params
        .get("value")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| CleoError::InvalidInput("missing boolean parameter 'value'".into()))?;
    let agent = opt_str(params, "agent").unwrap_or_else(|| SYSTEM_AGENT.to_string());
    let reason = opt_str(params, "reason");

    let update = ws.mutate_todo(|todo| {
        let task = todo.require_task_mut(id)?;
        match verify::set_gate(task, &gate, value, &agent, reason.as_deref(), Utc::now()) {
            Ok(update) => {
                let mut records = vec![AuditRecord::new(
                    "gate_set",
                    Some(id),
                    json!({"gate": gate, "value": value, "agent": agent}),
                )];
                if !update.invalidated.is_empty() {
                    records.push(AuditRecord::new(
                        "gates_invalidated",
                        Some(id),
                        json!({"gates": update.invalidated}),
                    ));
                }
                Ok(Mutation::new(Some(update), records))
            }
            Err(CleoError::VerificationRoundsExhausted(_)) => {
                // Persist the failure-log append, then fail after commit.
                let record = AuditRecord::new(
                    "verification_failed",
                    Some(id),
                    json!({"gate": gate, "reason": "round limit exhausted"}),
                );
                Ok(Mutation::single(None, record))
            }
            Err(other) => Err(other),
        }
    })?;

    let Some(update) = update else {
        return Err(CleoError::VerificationRoundsExhausted(format_task_id(id)));
    };
    Ok(Outcome::with_message(
        serde_json::to_value(&update)?,
        format!(
            "gate '{}' set on {}{}",
            update.gate,
            format_task_id(id),
            if update.invalidated.is_empty() {
                String::new()
            } else {
                format!(" (invalidated: {})", update.invalidated.join(", "))
            }
        ),
    ))
}

/// Verification record for one task, with epic aggregation over
/// non-cancelled children.
pub fn show(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let id = task_id(params, "id")?;
    let todo = ws.load_todo()?;
    let task = todo.require_task(id)?;
    let hierarchy = Hierarchy::build(&todo.tasks);

    let mut data = serde_json::to_value(&task.verification)?;
    if let Some(obj) = data.as_object_mut() {
        obj.insert("taskId".into(), json!(format_task_id(id)));
        obj.insert(
            "verified".into(),
            json!(verify::is_verified(&todo, &hierarchy, id)),
        );
        if opt_bool(params, "children") {
            let children: Vec<Value> = hierarchy
                .children_of(id)
                .iter()
                .map(|&child| {
                    json!({
                        "id": format_task_id(child),
                        "verified": verify::is_verified(&todo, &hierarchy, child),
                    })
                })
                .collect();
            obj.insert("childStatus".into(), json!(children));
        }
    }
    Ok(Outcome::data(data))
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{init_workspace, with};
    use super::super::add;
    use super::*;
    use crate::model::MAX_VERIFICATION_ROUNDS;

    #[test]
    fn gate_set_records_audit_and_invalidation() {
        let (_dir, ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "t"}))).unwrap();

        set(&with(
            &base,
            json!({"id": 1, "gate": "implemented", "value": true, "agent": "a1"}),
        ))
        .unwrap();
        set(&with(
            &base,
            json!({"id": 1, "gate": "testsPassed", "value": true, "agent": "a2"}),
        ))
        .unwrap();

        let outcome = set(&with(
            &base,
            json!({"id": 1, "gate": "implemented", "value": false, "agent": "a1", "reason": "regression"}),
        ))
        .unwrap();
        assert_eq!(outcome.data["invalidated"], json!(["testsPassed"]));

        let log = crate::audit::read_log(&ws.paths).unwrap();
        assert!(log.iter().any(|r| r.operation == "gates_invalidated"));

        let todo = ws.load_todo().unwrap();
        let v = &todo.task(1).unwrap().verification;
        assert_eq!(v.tests_passed, None);
        assert!(!v.passed);
        assert_eq!(v.round, 1);
    }

    #[test]
    fn creator_approval_is_rejected() {
        let (_dir, _ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "t", "agent": "author"}))).unwrap();
        let err = set(&with(
            &base,
            json!({"id": 1, "gate": "implemented", "value": true, "agent": "author"}),
        ))
        .unwrap_err();
        assert_eq!(err.code(), 6);
    }

    #[test]
    fn round_exhaustion_persists_failure_log() {
        let (_dir, ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "t"}))).unwrap();

        for _ in 0..MAX_VERIFICATION_ROUNDS {
            set(&with(
                &base,
                json!({"id": 1, "gate": "testsPassed", "value": false, "agent": "a2"}),
            ))
            .unwrap();
        }
        let err = set(&with(
            &base,
            json!({"id": 1, "gate": "testsPassed", "value": false, "agent": "a2"}),
        ))
        .unwrap_err();
        assert_eq!(err.name(), "VERIFICATION_ROUNDS_EXHAUSTED");

        let log = crate::audit::read_log(&ws.paths).unwrap();
        assert_eq!(log[0].operation, "verification_failed");
        let todo = ws.load_todo().unwrap();
        assert_eq!(
            todo.task(1).unwrap().verification.round,
            MAX_VERIFICATION_ROUNDS
        );
    }

    #[test]
    fn show_aggregates_epic_children() {
        let (_dir, _ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "E", "kind": "epic"}))).unwrap();
        add::run(&with(&base, json!({"title": "A", "parent": 1}))).unwrap();

        let outcome = show(&with(&base, json!({"id": 1, "children": true}))).unwrap();
        assert_eq!(outcome.data["verified"], json!(false));
        assert_eq!(outcome.data["childStatus"][0]["id"], json!("T002"));
    }
}
