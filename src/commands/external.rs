use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::error::{CleoError, Result};
use crate::gateway::Outcome;

/// Wall-clock ceiling for a shelled-out engine operation.
const ENGINE_TIMEOUT_SECS: u64 = 60;

fn engine_binary() -> Option<String> {
    std::env::var("CLEO_ENGINE_BIN").ok().filter(|b| !b.is_empty())
}

/// Run a cli-mode operation by shelling out to the bundled engine with
/// structured JSON on stdout. Without an engine binary configured the
/// operation surfaces CLI_REQUIRED.
pub fn run(domain: &str, operation: &str, params: &Value) -> Result<Outcome> {
    let Some(binary) = engine_binary() else {
        return Err(CleoError::CliRequired(format!("{domain} {operation}")));
    };

    let mut child = Command::new(&binary)
        .arg(domain)
        .arg(operation)
        .arg(serde_json::to_string(params)?)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| CleoError::FileError {
            path: binary.clone(),
            reason: e.to_string(),
        })?;

    // Bounded wait; a hung engine is killed rather than inherited.
    let deadline = Instant::now() + Duration::from_secs(ENGINE_TIMEOUT_SECS);
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CleoError::InvalidOperation(
                    domain.to_string(),
                    format!("{operation} timed out after {ENGINE_TIMEOUT_SECS}s"),
                ));
            }
            None => std::thread::sleep(Duration::from_millis(25)),
        }
    };

    let mut stdout = String::new();
    if let Some(mut pipe) = child.stdout.take() {
        pipe.read_to_string(&mut stdout)?;
    }

    if !status.success() {
        return Err(CleoError::InvalidOperation(
            domain.to_string(),
            format!("{operation} failed in engine (exit {:?})", status.code()),
        ));
    }

    let data: Value = serde_json::from_str(stdout.trim()).unwrap_or(json!({"raw": stdout.trim()}));
    Ok(Outcome::data(data))
}
