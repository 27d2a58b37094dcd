use chrono::{Duration, Utc};
use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::Result;
use crate::gateway::Outcome;
use crate::model::{Status, format_task_id};
use crate::store::workspace::Mutation;

use super::{opt_bool, opt_u64, workspace};

/// Move done tasks past the age threshold into the archive aggregate.
/// The most recent `preserveRecentCount` done tasks stay live; ids are
/// never reused after archiving.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    if !ws.config.archive.enabled && !opt_bool(params, "force") {
        return Ok(Outcome::no_change(
            json!({"archived": []}),
            "archiving is disabled (archive.enabled=false)",
        ));
    }

    let days = opt_u64(params, "olderThanDays")
        .map(|d| d as i64)
        .unwrap_or(ws.config.archive.days_until_archive);
    let preserve = ws.config.archive.preserve_recent_count;
    let dry_run = opt_bool(params, "dryRun");

    let now = Utc::now();
    let cutoff = now - Duration::days(days);

    if dry_run {
        let todo = ws.load_todo()?;
        let candidates = candidates(&todo.tasks, cutoff, preserve);
        let rendered: Vec<String> = candidates.iter().map(|&id| format_task_id(id)).collect();
        return Ok(Outcome::with_message(
            json!({"wouldArchive": rendered}),
            format!("dry-run: would archive {} task(s)", rendered.len()),
        ));
    }

    let moved = ws.mutate_todo_and_archive(|todo, archive| {
        let ids = candidates(&todo.tasks, cutoff, preserve);
        let mut moved = Vec::new();
        for &id in &ids {
            if let Some(pos) = todo.tasks.iter().position(|t| t.id == id) {
                let mut task = todo.tasks.remove(pos);
                task.archived_at = Some(now);
                archive.tasks.push(task);
                moved.push(id);
            }
        }
        if todo.focus.task_id.is_some_and(|f| moved.contains(&f)) {
            todo.focus.task_id = None;
        }
        let record = AuditRecord::new(
            "tasks_archived",
            None,
            json!({"count": moved.len(), "ids": moved.iter().map(|&id| format_task_id(id)).collect::<Vec<_>>()}),
        );
        Ok(Mutation::single(moved, record))
    })?;

    if moved.is_empty() {
        return Ok(Outcome::no_change(
            json!({"archived": []}),
            "nothing old enough to archive",
        ));
    }
    let rendered: Vec<String> = moved.iter().map(|&id| format_task_id(id)).collect();
    Ok(Outcome::with_message(
        json!({"archived": rendered}),
        format!("archived {} task(s)", rendered.len()),
    ))
}

fn candidates(
    tasks: &[crate::model::Task],
    cutoff: chrono::DateTime<Utc>,
    preserve: usize,
) -> Vec<u64> {
    let mut done: Vec<&crate::model::Task> = tasks
        .iter()
        .filter(|t| t.status == Status::Done)
        .collect();
    // Newest completions first; the preserved window shields them.
    done.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    let mut ids: Vec<u64> = done
        .into_iter()
        .skip(preserve)
        .filter(|t| t.completed_at.is_some_and(|c| c < cutoff))
        .map(|t| t.id)
        .collect();
    ids.sort_unstable();
    ids
}
