use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{CleoError, Result};
use crate::graph::Hierarchy;
use crate::model::{
    FailureEntry, GATE_ORDER, Kind, MAX_VERIFICATION_ROUNDS, Status, Task, VALIDATION_GATES,
    format_task_id,
};
use crate::project::TodoFile;

/// Agent identity exempt from circular-approval rules.
pub const SYSTEM_AGENT: &str = "user";

/// Result of one gate mutation, for envelopes and audit records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateUpdate {
    pub gate: String,
    pub value: bool,
    pub invalidated: Vec<String>,
    pub round: u32,
    pub passed: bool,
}

fn gate_index(name: &str) -> Result<usize> {
    GATE_ORDER
        .iter()
        .position(|&g| g == name)
        .ok_or_else(|| CleoError::InvalidInput(format!("unknown verification gate '{name}'")))
}

fn check_circular_approval(task: &Task, gate: &str, agent: &str) -> Result<()> {
    if agent == SYSTEM_AGENT {
        return Ok(());
    }
    if task.created_by.as_deref() == Some(agent) {
        return Err(CleoError::GateRejected {
            gate: gate.to_string(),
            reason: format!("'{agent}' created this task and cannot approve its gates"),
        });
    }
    let idx = gate_index(gate)?;
    for downstream in &GATE_ORDER[idx + 1..] {
        if !VALIDATION_GATES.contains(downstream) {
            continue;
        }
        if task.verification.gate_agents.get(*downstream).map(String::as_str) == Some(agent) {
            return Err(CleoError::GateRejected {
                gate: gate.to_string(),
                reason: format!(
                    "'{agent}' most recently approved downstream gate '{downstream}'"
                ),
            });
        }
    }
    Ok(())
}

/// Set one gate on a task. Every gate downstream of it resets to null,
/// the setter is recorded, and a `false` value opens another bounded
/// verification round. Exhausting the round budget fails verification
/// permanently and logs the offending gate.
pub fn set_gate(
    task: &mut Task,
    gate: &str,
    value: bool,
    agent: &str,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<GateUpdate> {
    let idx = gate_index(gate)?;
    if gate == "reserved" {
        return Err(CleoError::InvalidInput(
            "the reserved gate cannot be set".into(),
        ));
    }
    check_circular_approval(task, gate, agent)?;

    if !value {
        if task.verification.round >= MAX_VERIFICATION_ROUNDS {
            task.verification.passed = false;
            task.verification.failure_log.push(FailureEntry {
                gate: gate.to_string(),
                reason: format!(
                    "round limit ({MAX_VERIFICATION_ROUNDS}) exhausted: {}",
                    reason.unwrap_or("gate failed")
                ),
                timestamp: now,
                agent: Some(agent.to_string()),
            });
            return Err(CleoError::VerificationRoundsExhausted(format_task_id(
                task.id,
            )));
        }
        task.verification.round += 1;
        task.verification.failure_log.push(FailureEntry {
            gate: gate.to_string(),
            reason: reason.unwrap_or("gate failed").to_string(),
            timestamp: now,
            agent: Some(agent.to_string()),
        });
    }

    task.verification.set_gate(gate, Some(value));
    let mut invalidated = Vec::new();
    for downstream in &GATE_ORDER[idx + 1..] {
        if task.verification.gate(downstream) == Some(None) {
            continue;
        }
        task.verification.set_gate(downstream, None);
        task.verification.gate_agents.remove(*downstream);
        invalidated.push((*downstream).to_string());
    }

    task.verification
        .gate_agents
        .insert(gate.to_string(), agent.to_string());
    task.verification.last_agent = Some(agent.to_string());
    task.verification.last_updated = Some(now);
    task.verification.passed = task.verification.evaluate();
    task.updated_at = now;

    Ok(GateUpdate {
        gate: gate.to_string(),
        value,
        invalidated,
        round: task.verification.round,
        passed: task.verification.passed,
    })
}

/// An epic is verified only when every non-cancelled child is verified.
/// Tasks without children answer from their own record.
pub fn is_verified(todo: &TodoFile, hierarchy: &Hierarchy, id: u64) -> bool {
    let Some(task) = todo.task(id) else {
        return false;
    };
    let children = hierarchy.children_of(id);
    if task.kind == Some(Kind::Epic) && !children.is_empty() {
        return children.iter().all(|&child| {
            todo.task(child)
                .map(|t| t.status == Status::Cancelled || is_verified(todo, hierarchy, child))
                .unwrap_or(false)
        });
    }
    task.verification.passed
}
