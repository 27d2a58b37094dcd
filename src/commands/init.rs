use std::path::PathBuf;

use serde_json::{Value, json};

use crate::error::Result;
use crate::gateway::Outcome;
use crate::store::workspace::Workspace;

use super::opt_str;

/// Create the `.cleo/` directory in the target (or current) directory.
pub fn run(params: &Value) -> Result<Outcome> {
    let root = match opt_str(params, "root") {
        Some(root) => PathBuf::from(root),
        None => std::env::current_dir()?,
    };
    let name = opt_str(params, "name").or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
    });

    let ws = Workspace::init(&root, name)?;
    Ok(Outcome::with_message(
        json!({
            "root": ws.paths.project_root().display().to_string(),
            "cleoDir": ws.paths.cleo_dir().display().to_string(),
        }),
        "initialized cleo project",
    ))
}
