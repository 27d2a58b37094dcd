use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::graph::Hierarchy;
use crate::model::format_task_id;
use crate::project::TodoFile;
use crate::store::workspace::Mutation;

use super::{opt_bool, opt_str, task_id, workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum Strategy {
    /// Refuse when children exist.
    Block,
    /// Delete the task and all descendants.
    Cascade,
    /// Re-parent children to the deleted task's parent.
    Orphan,
}

struct Impact {
    would_delete: Vec<u64>,
    lost_by_status: BTreeMap<String, usize>,
    dependents_affected: Vec<u64>,
    orphaned_children: Vec<u64>,
    warnings: Vec<&'static str>,
}

fn assess(todo: &TodoFile, id: u64, strategy: Strategy) -> Result<Impact> {
    todo.require_task(id)?;
    let hierarchy = Hierarchy::build(&todo.tasks);
    let children = hierarchy.children_of(id).to_vec();

    if strategy == Strategy::Block && !children.is_empty() {
        return Err(CleoError::TaskHasChildren(format_task_id(id)));
    }

    let mut would_delete = vec![id];
    let mut orphaned_children = Vec::new();
    match strategy {
        Strategy::Cascade => would_delete.extend(hierarchy.descendants_of(id)),
        Strategy::Orphan => orphaned_children = children,
        Strategy::Block => {}
    }
    would_delete.sort_unstable();
    would_delete.dedup();
    let doomed: HashSet<u64> = would_delete.iter().copied().collect();

    let mut lost_by_status: BTreeMap<String, usize> = BTreeMap::new();
    for &gone in &would_delete {
        if let Some(task) = todo.task(gone) {
            *lost_by_status.entry(task.status.to_string()).or_default() += 1;
        }
    }

    // Survivors that reference a deleted task lose a dependency link.
    let mut dependents_affected: Vec<u64> = todo
        .tasks
        .iter()
        .filter(|t| !doomed.contains(&t.id))
        .filter(|t| {
            t.depends.iter().any(|dep| doomed.contains(dep))
                || t.blocked_by.iter().any(|dep| doomed.contains(dep))
        })
        .map(|t| t.id)
        .collect();
    dependents_affected.sort_unstable();

    let mut warnings = Vec::new();
    if !dependents_affected.is_empty() {
        warnings.push("W_BROKEN_DEPS");
    }
    if lost_by_status.contains_key("active") {
        warnings.push("W_ACTIVE_TASKS_LOST");
    }

    Ok(Impact {
        would_delete,
        lost_by_status,
        dependents_affected,
        orphaned_children,
        warnings,
    })
}

fn impact_json(impact: &Impact) -> Value {
    json!({
        "wouldDelete": impact.would_delete.iter().map(|&id| format_task_id(id)).collect::<Vec<_>>(),
        "lostByStatus": impact.lost_by_status,
        "dependentsAffected": impact.dependents_affected.iter().map(|&id| format_task_id(id)).collect::<Vec<_>>(),
        "orphanedChildren": impact.orphaned_children.iter().map(|&id| format_task_id(id)).collect::<Vec<_>>(),
        "warnings": impact.warnings,
    })
}

/// Delete with an explicit child strategy. `--dry-run` returns the
/// impact report without touching anything; the apply path removes the
/// whole set and strips dangling references in one atomic commit.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    super::require_session(&ws)?;
    let id = task_id(params, "id")?;
    let strategy = match opt_str(params, "children").as_deref() {
        None | Some("block") => Strategy::Block,
        Some("cascade") => Strategy::Cascade,
        Some("orphan") => Strategy::Orphan,
        Some(other) => {
            return Err(CleoError::InvalidInput(format!(
                "unknown delete strategy '{other}'"
            )));
        }
    };
    let dry_run = opt_bool(params, "dryRun");

    if dry_run {
        let todo = ws.load_todo()?;
        let impact = assess(&todo, id, strategy)?;
        return Ok(Outcome::with_message(
            impact_json(&impact),
            format!(
                "dry-run: would delete {} task(s)",
                impact.would_delete.len()
            ),
        ));
    }

    let impact = ws.mutate_todo(|todo| {
        let impact = assess(todo, id, strategy)?;
        let doomed: HashSet<u64> = impact.would_delete.iter().copied().collect();
        let new_parent = todo.task(id).and_then(|t| t.parent_id);

        if strategy == Strategy::Orphan {
            for &child in &impact.orphaned_children {
                if let Some(task) = todo.task_mut(child) {
                    task.parent_id = new_parent;
                    task.updated_at = Utc::now();
                }
            }
        }

        todo.tasks.retain(|t| !doomed.contains(&t.id));
        for task in &mut todo.tasks {
            task.depends.retain(|dep| !doomed.contains(dep));
            task.blocked_by.retain(|dep| !doomed.contains(dep));
        }
        if todo.focus.task_id.is_some_and(|f| doomed.contains(&f)) {
            todo.focus.task_id = None;
        }

        let record = AuditRecord::new("task_deleted", Some(id), impact_json(&impact));
        Ok(Mutation::single(impact, record))
    })?;

    Ok(Outcome::with_message(
        impact_json(&impact),
        format!("deleted {} task(s)", impact.would_delete.len()),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{init_workspace, with};
    use super::super::{add, update};
    use super::*;

    /// Epic E (T001) with children A (T002), B (T003); C (T004) outside
    /// the epic depends on A.
    fn seed_epic(base: &Value) {
        add::run(&with(base, json!({"title": "E", "kind": "epic"}))).unwrap();
        add::run(&with(base, json!({"title": "A", "parent": 1}))).unwrap();
        add::run(&with(base, json!({"title": "B", "parent": 1}))).unwrap();
        add::run(&with(base, json!({"title": "C", "depends": [2]}))).unwrap();
    }

    #[test]
    fn block_strategy_refuses_children() {
        let (_dir, _ws, base) = init_workspace();
        seed_epic(&base);
        let err = run(&with(&base, json!({"id": 1}))).unwrap_err();
        assert_eq!(err.code(), 6);
        assert!(err.fix().unwrap().contains("cascade"));
    }

    #[test]
    fn cascade_dry_run_reports_impact_without_mutation() {
        let (_dir, ws, base) = init_workspace();
        seed_epic(&base);

        let outcome = run(&with(
            &base,
            json!({"id": 1, "children": "cascade", "dryRun": true}),
        ))
        .unwrap();
        assert_eq!(
            outcome.data["wouldDelete"],
            json!(["T001", "T002", "T003"])
        );
        assert_eq!(outcome.data["dependentsAffected"], json!(["T004"]));
        assert!(
            outcome.data["warnings"]
                .as_array()
                .unwrap()
                .contains(&json!("W_BROKEN_DEPS"))
        );

        assert_eq!(ws.load_todo().unwrap().tasks.len(), 4);
    }

    #[test]
    fn cascade_apply_removes_subtree_and_broken_deps() {
        let (_dir, ws, base) = init_workspace();
        seed_epic(&base);

        run(&with(&base, json!({"id": 1, "children": "cascade"}))).unwrap();

        let todo = ws.load_todo().unwrap();
        let ids: Vec<u64> = todo.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4]);
        assert!(todo.task(4).unwrap().depends.is_empty());
    }

    #[test]
    fn orphan_reparents_children_to_grandparent() {
        let (_dir, ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "grandparent"}))).unwrap();
        add::run(&with(&base, json!({"title": "middle", "parent": 1}))).unwrap();
        add::run(&with(&base, json!({"title": "leaf", "parent": 2}))).unwrap();

        run(&with(&base, json!({"id": 2, "children": "orphan"}))).unwrap();

        let todo = ws.load_todo().unwrap();
        assert_eq!(todo.task(3).unwrap().parent_id, Some(1));
    }

    #[test]
    fn deleting_focused_task_clears_focus() {
        let (_dir, ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "focused"}))).unwrap();
        ws.mutate_todo(|todo| {
            todo.focus.task_id = Some(1);
            Ok(Mutation::new((), vec![]))
        })
        .unwrap();

        run(&with(&base, json!({"id": 1}))).unwrap();
        assert_eq!(ws.load_todo().unwrap().focus.task_id, None);
    }

    #[test]
    fn lost_by_status_counts_statuses() {
        let (_dir, _ws, base) = init_workspace();
        seed_epic(&base);
        update::run(&with(&base, json!({"id": 2, "status": "active"}))).unwrap();

        let outcome = run(&with(
            &base,
            json!({"id": 1, "children": "cascade", "dryRun": true}),
        ))
        .unwrap();
        assert_eq!(outcome.data["lostByStatus"]["pending"], json!(2));
        assert_eq!(outcome.data["lostByStatus"]["active"], json!(1));
        assert!(
            outcome.data["warnings"]
                .as_array()
                .unwrap()
                .contains(&json!("W_ACTIVE_TASKS_LOST"))
        );
    }

    #[test]
    fn ids_are_never_reused_after_delete() {
        let (_dir, ws, base) = init_workspace();
        add::run(&with(&base, json!({"title": "first"}))).unwrap();
        run(&with(&base, json!({"id": 1}))).unwrap();
        let outcome = add::run(&with(&base, json!({"title": "second"}))).unwrap();
        assert_eq!(outcome.data["displayId"], json!("T002"));
        assert_eq!(ws.load_sequence().unwrap().counter, 2);
    }
}
