use serde_json::{Value, json};

use crate::audit::AuditRecord;
use crate::error::{CleoError, Result};
use crate::gateway::Outcome;
use crate::store::backup::{self, BackupRing};

use super::{opt_str, opt_u64, workspace};

/// Write a timestamped operational snapshot of every top-level state
/// file.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let dest = backup::snapshot(ws.paths.cleo_dir())?;
    crate::audit::append(
        &ws.paths,
        &AuditRecord::new(
            "checkpoint",
            None,
            json!({"snapshot": dest.display().to_string()}),
        ),
    )?;
    Ok(Outcome::with_message(
        json!({"snapshot": dest.display().to_string()}),
        "checkpoint written",
    ))
}

/// Restore from an operational snapshot (`snapshot`: name or `latest`)
/// or from a per-write ring entry (`file` + `entry`).
pub fn restore(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;

    if let Some(file) = opt_str(params, "file") {
        let entry = opt_u64(params, "entry").unwrap_or(1) as usize;
        let ring = BackupRing::for_cleo_dir(ws.paths.cleo_dir());
        let target = ws.paths.cleo_dir().join(&file);
        ring.restore(&file, entry, &target)?;
        crate::audit::append(
            &ws.paths,
            &AuditRecord::new("restore", None, json!({"file": file, "entry": entry})),
        )?;
        return Ok(Outcome::with_message(
            json!({"restored": file, "entry": entry}),
            "ring entry restored",
        ));
    }

    let selector = opt_str(params, "snapshot").unwrap_or_else(|| "latest".into());
    let snapshots = backup::list_snapshots(ws.paths.cleo_dir())?;
    let snapshot = if selector == "latest" {
        snapshots.first().cloned()
    } else {
        snapshots
            .iter()
            .find(|s| s.file_name().is_some_and(|n| n.to_string_lossy() == selector))
            .cloned()
    };
    let Some(snapshot) = snapshot else {
        return Err(CleoError::FileError {
            path: selector,
            reason: "snapshot not found".into(),
        });
    };

    let restored = backup::restore_snapshot(ws.paths.cleo_dir(), &snapshot)?;
    crate::audit::append(
        &ws.paths,
        &AuditRecord::new(
            "restore",
            None,
            json!({"snapshot": snapshot.display().to_string(), "files": restored}),
        ),
    )?;
    Ok(Outcome::with_message(
        json!({"snapshot": snapshot.display().to_string(), "files": restored}),
        format!("restored {restored} file(s)"),
    ))
}
