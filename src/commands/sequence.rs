use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::Result;
use crate::gateway::Outcome;
use crate::model::format_task_id;
use crate::store::lock::with_file_lock;

use super::workspace;

pub fn show(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let sequence = ws.load_sequence()?;
    Ok(Outcome::data(json!({
        "counter": sequence.counter,
        "lastId": sequence.last_id,
        "nextId": format_task_id(sequence.next_id()),
        "checksumValid": sequence.checksum_valid(),
    })))
}

fn observed_max(ws: &crate::store::workspace::Workspace) -> Result<u64> {
    let todo = ws.load_todo()?;
    let archive = ws.load_archive()?;
    Ok(todo.max_task_id().max(archive.max_task_id()))
}

/// Compare the counter against the observed maximum across live and
/// archived tasks.
pub fn check(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let sequence = ws.load_sequence()?;
    let max = observed_max(&ws)?;
    sequence.check(max)?;
    Ok(Outcome::with_message(
        json!({"counter": sequence.counter, "observedMax": max}),
        "sequence is consistent",
    ))
}

/// Advance the counter to the observed maximum; never moves backward.
pub fn repair(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let max = observed_max(&ws)?;

    let (changed, counter) = with_file_lock(&ws.paths.sequence_lock(), || {
        let mut sequence = ws.load_sequence()?;
        let changed = sequence.repair_to(max)?;
        if changed {
            sequence.save(&ws.paths.sequence_file())?;
        }
        Ok((changed, sequence.counter))
    })?;

    if !changed {
        return Ok(Outcome::no_change(
            json!({"counter": counter}),
            "sequence already consistent",
        ));
    }
    crate::audit::append(
        &ws.paths,
        &AuditRecord::new("sequence_repaired", None, json!({"counter": counter})),
    )?;
    Ok(Outcome::with_message(
        json!({"counter": counter}),
        format!("sequence advanced to {counter}"),
    ))
}
