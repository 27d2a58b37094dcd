use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths::CleoPaths;
use crate::store::atomic;
use crate::store::lock::with_file_lock;

/// One entry in the operation log (`todo-log.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl AuditRecord {
    pub fn new(operation: &str, task_id: Option<u64>, details: serde_json::Value) -> Self {
        Self {
            operation: operation.to_string(),
            task_id,
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Append a record to the operation log under its lock. Storage order
/// is chronological; list responses reverse to newest-first.
pub fn append(paths: &CleoPaths, record: &AuditRecord) -> Result<()> {
    let log_path = paths.log_file();
    with_file_lock(&paths.lock_file("todo-log"), || {
        let mut records: Vec<AuditRecord> = if log_path.exists() {
            atomic::read_json(&log_path)?
        } else {
            Vec::new()
        };
        records.push(record.clone());
        atomic::write_json_atomic(&log_path, &records)
    })
}

/// Read the full log, newest first.
pub fn read_log(paths: &CleoPaths) -> Result<Vec<AuditRecord>> {
    let log_path = paths.log_file();
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let mut records: Vec<AuditRecord> = atomic::read_json(&log_path)?;
    records.reverse();
    Ok(records)
}

/// Append one line to an append-only JSONL metrics shard. Each append
/// is its own atomic operation on the shard file.
pub fn append_metric(paths: &CleoPaths, shard: &str, event: &serde_json::Value) -> Result<()> {
    use std::io::Write;

    let path = paths.metrics_shard(shard);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = format!("{}\n", serde_json::to_string(event)?);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}
