use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};

use crate::commands;
use crate::error::{CleoError, Result};
use crate::platform::format_timestamp;

pub const GATEWAY_NAME: &str = "cleo";
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Non-error success variants in the exit-code taxonomy.
pub const EXIT_NO_CHANGE: i32 = 100;
pub const EXIT_NO_DATA: i32 = 101;
pub const EXIT_ALREADY_AS_REQUESTED: i32 = 102;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Query,
    Mutate,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutate => write!(f, "mutate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Native,
    Cli,
    Hybrid,
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Cli => write!(f, "cli"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// One entry in the capability matrix.
pub struct OpSpec {
    pub kind: OpKind,
    pub domain: &'static str,
    pub operation: &'static str,
    pub mode: ExecMode,
}

/// The full (kind, domain, operation) matrix. Explicit entries, no open
/// inheritance; dispatch matches against this table.
pub const CAPABILITIES: &[OpSpec] = &[
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "add", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "update", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "complete", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "delete", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "archive", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "focus-set", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "focus-clear", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "focus-note", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "tasks", operation: "verify-set", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "tasks", operation: "list", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "tasks", operation: "show", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "tasks", operation: "find", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "tasks", operation: "next", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "tasks", operation: "tree", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "tasks", operation: "deps", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "tasks", operation: "verify-show", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "tasks", operation: "log", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "phases", operation: "set", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "phases", operation: "show", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "sessions", operation: "start", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "sessions", operation: "end", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "sessions", operation: "resume", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "sessions", operation: "gc", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "sessions", operation: "list", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "validate", operation: "run", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "validate", operation: "doctor", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "validate", operation: "fix", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "system", operation: "init", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "system", operation: "upgrade", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "system", operation: "migrate-storage", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "system", operation: "checkpoint", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "system", operation: "restore", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "system", operation: "sequence-show", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "system", operation: "sequence-check", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "system", operation: "sequence-repair", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Mutate, domain: "system", operation: "context-report", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "system", operation: "context-status", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "system", operation: "locks", mode: ExecMode::Native },
    OpSpec { kind: OpKind::Query, domain: "system", operation: "capabilities", mode: ExecMode::Native },
    // Engine-backed domains shell out to the bundled CLI; with no engine
    // present they surface CLI_REQUIRED.
    OpSpec { kind: OpKind::Mutate, domain: "orchestrate", operation: "*", mode: ExecMode::Cli },
    OpSpec { kind: OpKind::Query, domain: "research", operation: "*", mode: ExecMode::Cli },
    OpSpec { kind: OpKind::Mutate, domain: "lifecycle", operation: "*", mode: ExecMode::Cli },
    OpSpec { kind: OpKind::Mutate, domain: "release", operation: "*", mode: ExecMode::Cli },
    OpSpec { kind: OpKind::Query, domain: "nexus", operation: "*", mode: ExecMode::Cli },
    OpSpec { kind: OpKind::Mutate, domain: "issues", operation: "*", mode: ExecMode::Cli },
];

pub fn capability(domain: &str, operation: &str) -> Option<&'static OpSpec> {
    CAPABILITIES
        .iter()
        .find(|spec| spec.domain == domain && (spec.operation == operation || spec.operation == "*"))
}

/// Handler output before envelope wrapping.
#[derive(Debug, Default)]
pub struct Outcome {
    pub data: Value,
    pub message: Option<String>,
    pub no_change: bool,
    pub exit_override: Option<i32>,
}

impl Outcome {
    pub fn data(data: Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_message(data: Value, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn no_change(data: Value, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
            no_change: true,
            ..Default::default()
        }
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            message: Some(message.into()),
            no_change: false,
            exit_override: Some(EXIT_NO_DATA),
        }
    }

    pub fn already_as_requested(data: Value, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
            no_change: false,
            exit_override: Some(EXIT_ALREADY_AS_REQUESTED),
        }
    }
}

/// The uniform response envelope plus the process exit code it implies.
#[derive(Debug)]
pub struct Envelope {
    pub body: Value,
    pub exit_code: i32,
}

fn meta(domain: &str, operation: &str, started: Instant) -> Value {
    json!({
        "gateway": GATEWAY_NAME,
        "domain": domain,
        "operation": operation,
        "version": GATEWAY_VERSION,
        "timestamp": format_timestamp(Utc::now()),
        "duration_ms": started.elapsed().as_millis() as u64,
    })
}

fn success_envelope(domain: &str, operation: &str, outcome: Outcome, started: Instant) -> Envelope {
    let exit_code = outcome
        .exit_override
        .unwrap_or(if outcome.no_change { EXIT_NO_CHANGE } else { 0 });

    let mut body = json!({
        "success": true,
        "data": outcome.data,
        "_meta": meta(domain, operation, started),
    });
    if let Some(message) = outcome.message {
        body["message"] = Value::String(message);
    }
    if outcome.no_change {
        body["noChange"] = Value::Bool(true);
    }
    Envelope { body, exit_code }
}

fn error_envelope(domain: &str, operation: &str, err: &CleoError, started: Instant) -> Envelope {
    let mut error = json!({
        "code": err.code(),
        "name": err.name(),
        "message": err.to_string(),
    });
    if let Some(fix) = err.fix() {
        error["fix"] = Value::String(fix);
    }
    if let CleoError::TaskHasChildren(id) = err {
        error["alternatives"] = json!([
            {"action": "cascade delete", "command": format!("cleo tasks delete {id} --children cascade")},
            {"action": "orphan children", "command": format!("cleo tasks delete {id} --children orphan")},
        ]);
    }
    Envelope {
        body: json!({
            "success": false,
            "error": error,
            "_meta": meta(domain, operation, started),
        }),
        exit_code: err.code(),
    }
}

fn route(kind: OpKind, domain: &str, operation: &str, params: &Value) -> Result<Outcome> {
    let spec = capability(domain, operation).ok_or_else(|| {
        CleoError::InvalidOperation(domain.to_string(), operation.to_string())
    })?;
    if spec.kind != kind {
        return Err(CleoError::InvalidOperation(
            domain.to_string(),
            format!("{operation} is a {} operation", spec.kind),
        ));
    }
    if spec.mode == ExecMode::Cli {
        return commands::external::run(domain, operation, params);
    }

    match (domain, operation) {
        ("tasks", "add") => commands::add::run(params),
        ("tasks", "update") => commands::update::run(params),
        ("tasks", "complete") => commands::complete::run(params),
        ("tasks", "delete") => commands::delete::run(params),
        ("tasks", "archive") => commands::archive::run(params),
        ("tasks", "focus-set") => commands::focus::set(params),
        ("tasks", "focus-clear") => commands::focus::clear(params),
        ("tasks", "focus-note") => commands::focus::note(params),
        ("tasks", "verify-set") => commands::verify::set(params),
        ("tasks", "verify-show") => commands::verify::show(params),
        ("tasks", "list") => commands::list::run(params),
        ("tasks", "show") => commands::show::run(params),
        ("tasks", "find") => commands::find::run(params),
        ("tasks", "next") => commands::next::run(params),
        ("tasks", "tree") => commands::tree::run(params),
        ("tasks", "deps") => commands::deps::run(params),
        ("tasks", "log") => commands::log::run(params),
        ("phases", "set") => commands::phase::set(params),
        ("phases", "show") => commands::phase::show(params),
        ("sessions", "start") => commands::session::start(params),
        ("sessions", "end") => commands::session::end(params),
        ("sessions", "resume") => commands::session::resume(params),
        ("sessions", "gc") => commands::session::gc(params),
        ("sessions", "list") => commands::session::list(params),
        ("validate", "run") => commands::validate::run(params),
        ("validate", "doctor") => commands::validate::doctor(params),
        ("validate", "fix") => commands::validate::fix(params),
        ("system", "init") => commands::init::run(params),
        ("system", "upgrade") => commands::upgrade::run(params),
        ("system", "migrate-storage") => commands::migrate_storage::run(params),
        ("system", "checkpoint") => commands::checkpoint::run(params),
        ("system", "restore") => commands::checkpoint::restore(params),
        ("system", "sequence-show") => commands::sequence::show(params),
        ("system", "sequence-check") => commands::sequence::check(params),
        ("system", "sequence-repair") => commands::sequence::repair(params),
        ("system", "context-report") => commands::context::report(params),
        ("system", "context-status") => commands::context::status(params),
        ("system", "locks") => commands::context::locks(params),
        ("system", "capabilities") => Ok(capabilities_outcome()),
        _ => Err(CleoError::InvalidOperation(
            domain.to_string(),
            operation.to_string(),
        )),
    }
}

fn capabilities_outcome() -> Outcome {
    let entries: Vec<Value> = CAPABILITIES
        .iter()
        .map(|spec| {
            json!({
                "kind": spec.kind.to_string(),
                "domain": spec.domain,
                "operation": spec.operation,
                "mode": spec.mode.to_string(),
            })
        })
        .collect();
    Outcome::data(json!({"operations": entries}))
}

/// Entry point for every transport: resolve the (kind, domain,
/// operation) triple, run the handler, and wrap the result in the
/// uniform envelope. The envelope's error code always equals the
/// returned exit code.
pub fn dispatch(kind: OpKind, domain: &str, operation: &str, params: &Value) -> Envelope {
    let started = Instant::now();
    match route(kind, domain, operation, params) {
        Ok(outcome) => success_envelope(domain, operation, outcome, started),
        Err(err) => error_envelope(domain, operation, &err, started),
    }
}
