use std::io::IsTerminal;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use cleo::config::EngineKind;
use cleo::gateway::{self, OpKind};
use cleo::model::{Kind, Priority, Size, Status};
use cleo::output::{Format, print_envelope};

#[derive(Parser)]
#[command(
    name = "cleo",
    version,
    about = "Project-local task management for AI coding agents"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format json
    #[arg(long, global = true, hide = true, conflicts_with = "human")]
    json: bool,
    /// Shorthand for --format human
    #[arg(long, global = true, hide = true)]
    human: bool,
    /// Suppress success output
    #[arg(long, global = true)]
    quiet: bool,
    /// Verbose diagnostics on stderr
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a .cleo/ directory in the current project
    Init {
        /// Project name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Task operations
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },
    /// Show or set the project phase
    Phase {
        #[command(subcommand)]
        action: PhaseAction,
    },
    /// Session lifecycle
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Dependency waves
    Deps,
    /// Parent/child hierarchy
    Tree {
        /// Root task ID (omit for full tree)
        root: Option<String>,
    },
    /// Focus binding
    Focus {
        #[command(subcommand)]
        action: FocusAction,
    },
    /// Suggest the next task
    Next,
    /// Search tasks
    Find {
        /// Substring to match in titles, descriptions, labels
        query: String,
    },
    /// Verification gates
    Verify {
        #[command(subcommand)]
        action: VerifyAction,
    },
    /// Validate project state
    Validate {
        /// Apply repairs
        #[arg(long)]
        fix: bool,
        /// Preview repairs without applying
        #[arg(long)]
        dry_run: bool,
        /// Fail on error-level drift
        #[arg(long)]
        strict: bool,
    },
    /// Full diagnostic report
    Doctor {
        /// Fail on blocking lock contention
        #[arg(long)]
        strict: bool,
    },
    /// Idempotent schema/storage upgrade
    Upgrade {
        /// Preview actions without applying
        #[arg(long)]
        dry_run: bool,
    },
    /// Migrate between storage engines
    MigrateStorage {
        /// Target engine
        #[arg(long, value_enum)]
        to: EngineKind,
        /// Preview the preflight without migrating
        #[arg(long)]
        dry_run: bool,
    },
    /// Sequence counter operations
    Sequence {
        #[command(subcommand)]
        action: SequenceAction,
    },
    /// Write an operational snapshot
    Checkpoint,
    /// Restore from a snapshot or backup-ring entry
    Restore {
        /// Snapshot name, or 'latest'
        #[arg(long)]
        snapshot: Option<String>,
        /// Restore a single file from the per-write ring
        #[arg(long, conflicts_with = "snapshot")]
        file: Option<String>,
        /// Ring entry number (1 = newest)
        #[arg(long, requires = "file")]
        entry: Option<u64>,
    },
    /// Context-window monitoring
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
    /// Operation log
    Log {
        /// Filter by task ID
        #[arg(long)]
        id: Option<String>,
        /// Show only the most recent N entries
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Raw gateway access: dispatch one (kind, domain, operation)
    Gateway {
        /// query or mutate
        kind: String,
        domain: String,
        operation: String,
        /// JSON parameter object
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

#[derive(Subcommand)]
enum TasksAction {
    /// Create a new task
    Add {
        title: String,
        #[arg(long, short)]
        description: Option<String>,
        #[arg(long, value_enum)]
        priority: Option<Priority>,
        #[arg(long, value_enum)]
        size: Option<Size>,
        #[arg(long, value_enum)]
        kind: Option<Kind>,
        /// Parent task ID
        #[arg(long)]
        parent: Option<String>,
        /// Task IDs this task depends on (comma-separated)
        #[arg(long, value_delimiter = ',')]
        depends: Vec<String>,
        /// Labels (comma-separated)
        #[arg(long, value_delimiter = ',')]
        label: Vec<String>,
        /// Phase (defaults to inherited phase)
        #[arg(long)]
        phase: Option<String>,
        /// File touched by this task (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
        /// Acceptance criterion (repeatable)
        #[arg(long = "accept")]
        acceptance: Vec<String>,
        /// Creating agent identity
        #[arg(long)]
        agent: Option<String>,
    },
    /// List and filter tasks
    List {
        #[arg(long, value_enum)]
        status: Option<Status>,
        #[arg(long, value_enum)]
        priority: Option<Priority>,
        #[arg(long, value_enum)]
        kind: Option<Kind>,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        label: Option<String>,
        /// Include done and cancelled tasks
        #[arg(long)]
        all: bool,
        /// Order by weighting score
        #[arg(long)]
        by_score: bool,
    },
    /// Display a single task
    Show { id: String },
    /// Update task fields
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, short)]
        description: Option<String>,
        #[arg(long, value_enum)]
        status: Option<Status>,
        #[arg(long, value_enum)]
        priority: Option<Priority>,
        #[arg(long, value_enum)]
        size: Option<Size>,
        #[arg(long, value_enum)]
        kind: Option<Kind>,
        #[arg(long)]
        phase: Option<String>,
        /// New parent task ID
        #[arg(long)]
        parent: Option<String>,
        /// Replace dependencies (comma-separated)
        #[arg(long, value_delimiter = ',')]
        depends: Option<Vec<String>>,
        /// Replace labels (comma-separated)
        #[arg(long, value_delimiter = ',')]
        label: Option<Vec<String>>,
        /// Append a timestamped note
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Mark a task done
    Complete {
        id: String,
        /// Completion note
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Delete a task
    Delete {
        id: String,
        /// Strategy for children: block, cascade, or orphan
        #[arg(long, default_value = "block")]
        children: String,
        /// Preview the impact without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Move old done tasks to the archive
    Archive {
        /// Override the configured age threshold
        #[arg(long)]
        older_than_days: Option<u64>,
        /// Preview without moving
        #[arg(long)]
        dry_run: bool,
        /// Archive even when archive.enabled=false
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PhaseAction {
    /// Show phases, the current phase, and history
    Show,
    /// Move the project to a phase
    Set {
        target: String,
        /// Allow a backward move
        #[arg(long)]
        rollback: bool,
        /// Skip interactive confirmation
        #[arg(long)]
        force: bool,
        /// Reason recorded in phase history
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Start a session and make it current
    Start {
        name: String,
        /// 'global' or 'epic:<taskId>'
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// End the current (or a named) session
    End {
        /// Session id, id prefix, or name
        session: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Reactivate an ended session
    Resume { session: String },
    /// List sessions
    List,
    /// Mark dead sessions as orphaned
    Gc,
}

#[derive(Subcommand)]
enum FocusAction {
    /// Focus a task
    Set { id: String },
    /// Clear focus
    Clear,
    /// Attach a note to the focus binding
    Note { note: String },
}

#[derive(Subcommand)]
enum VerifyAction {
    /// Set one verification gate
    Set {
        id: String,
        /// Gate name (implemented, testsPassed, qaPassed, securityPassed, documented)
        gate: String,
        /// Gate value
        #[arg(long)]
        value: bool,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show a task's verification record
    Show {
        id: String,
        /// Include per-child status for epics
        #[arg(long)]
        children: bool,
    },
}

#[derive(Subcommand)]
enum SequenceAction {
    /// Counter, last id, and next id
    Show,
    /// Compare the counter to the observed max id
    Check,
    /// Advance the counter to the observed max
    Repair,
}

#[derive(Subcommand)]
enum ContextAction {
    /// Record a usage sample
    Report {
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        context_window_size: u64,
        #[arg(long)]
        current_usage: u64,
    },
    /// Evaluate recorded usage against the alert thresholds
    Status {
        #[arg(long)]
        session_id: Option<String>,
        /// Apply alert deduplication
        #[arg(long)]
        alert: bool,
    },
    /// Scan lock files for contention
    Locks,
}

fn enum_str<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn confirm_rollback(target: &str) -> bool {
    if !std::io::stdin().is_terminal() {
        return false;
    }
    eprint!("Roll back to phase '{target}'? [y/N] ");
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes")
}

fn to_request(command: Commands) -> (OpKind, &'static str, String, Value) {
    match command {
        Commands::Init { name } => (
            OpKind::Mutate,
            "system",
            "init".into(),
            json!({"name": name}),
        ),
        Commands::Tasks { action } => match action {
            TasksAction::Add {
                title,
                description,
                priority,
                size,
                kind,
                parent,
                depends,
                label,
                phase,
                files,
                acceptance,
                agent,
            } => (
                OpKind::Mutate,
                "tasks",
                "add".into(),
                json!({
                    "title": title,
                    "description": description,
                    "priority": priority.map(|p| enum_str(&p)),
                    "size": size.map(|s| enum_str(&s)),
                    "kind": kind.map(|k| enum_str(&k)),
                    "parent": parent,
                    "depends": depends,
                    "labels": label,
                    "phase": phase,
                    "files": files,
                    "acceptance": acceptance,
                    "agent": agent,
                }),
            ),
            TasksAction::List {
                status,
                priority,
                kind,
                phase,
                label,
                all,
                by_score,
            } => (
                OpKind::Query,
                "tasks",
                "list".into(),
                json!({
                    "status": status.map(|s| enum_str(&s)),
                    "priority": priority.map(|p| enum_str(&p)),
                    "kind": kind.map(|k| enum_str(&k)),
                    "phase": phase,
                    "label": label,
                    "all": all,
                    "byScore": by_score,
                }),
            ),
            TasksAction::Show { id } => {
                (OpKind::Query, "tasks", "show".into(), json!({"id": id}))
            }
            TasksAction::Update {
                id,
                title,
                description,
                status,
                priority,
                size,
                kind,
                phase,
                parent,
                depends,
                label,
                note,
                agent,
            } => {
                let mut params = json!({
                    "id": id,
                    "title": title,
                    "description": description,
                    "status": status.map(|s| enum_str(&s)),
                    "priority": priority.map(|p| enum_str(&p)),
                    "size": size.map(|s| enum_str(&s)),
                    "kind": kind.map(|k| enum_str(&k)),
                    "phase": phase,
                    "note": note,
                    "agent": agent,
                });
                // Absent vs null matters for parent/depends patches.
                if let Some(parent) = parent {
                    params["parent"] = json!(parent);
                }
                if let Some(depends) = depends {
                    params["depends"] = json!(depends);
                }
                if let Some(label) = label {
                    params["labels"] = json!(label);
                }
                (OpKind::Mutate, "tasks", "update".into(), params)
            }
            TasksAction::Complete { id, note, agent } => (
                OpKind::Mutate,
                "tasks",
                "complete".into(),
                json!({"id": id, "note": note, "agent": agent}),
            ),
            TasksAction::Delete {
                id,
                children,
                dry_run,
            } => (
                OpKind::Mutate,
                "tasks",
                "delete".into(),
                json!({"id": id, "children": children, "dryRun": dry_run}),
            ),
            TasksAction::Archive {
                older_than_days,
                dry_run,
                force,
            } => (
                OpKind::Mutate,
                "tasks",
                "archive".into(),
                json!({"olderThanDays": older_than_days, "dryRun": dry_run, "force": force}),
            ),
        },
        Commands::Phase { action } => match action {
            PhaseAction::Show => (OpKind::Query, "phases", "show".into(), json!({})),
            PhaseAction::Set {
                target,
                rollback,
                force,
                reason,
            } => {
                let interactive = rollback && !force && confirm_rollback(&target);
                (
                    OpKind::Mutate,
                    "phases",
                    "set".into(),
                    json!({
                        "target": target,
                        "rollback": rollback,
                        "force": force,
                        "interactive": interactive,
                        "reason": reason,
                    }),
                )
            }
        },
        Commands::Session { action } => match action {
            SessionAction::Start {
                name,
                scope,
                agent,
                note,
            } => (
                OpKind::Mutate,
                "sessions",
                "start".into(),
                json!({"name": name, "scope": scope, "agent": agent, "note": note}),
            ),
            SessionAction::End { session, note } => (
                OpKind::Mutate,
                "sessions",
                "end".into(),
                json!({"session": session, "note": note}),
            ),
            SessionAction::Resume { session } => (
                OpKind::Mutate,
                "sessions",
                "resume".into(),
                json!({"session": session}),
            ),
            SessionAction::List => (OpKind::Query, "sessions", "list".into(), json!({})),
            SessionAction::Gc => (OpKind::Mutate, "sessions", "gc".into(), json!({})),
        },
        Commands::Deps => (OpKind::Query, "tasks", "deps".into(), json!({})),
        Commands::Tree { root } => {
            (OpKind::Query, "tasks", "tree".into(), json!({"root": root}))
        }
        Commands::Focus { action } => match action {
            FocusAction::Set { id } => (
                OpKind::Mutate,
                "tasks",
                "focus-set".into(),
                json!({"id": id}),
            ),
            FocusAction::Clear => (OpKind::Mutate, "tasks", "focus-clear".into(), json!({})),
            FocusAction::Note { note } => (
                OpKind::Mutate,
                "tasks",
                "focus-note".into(),
                json!({"note": note}),
            ),
        },
        Commands::Next => (OpKind::Query, "tasks", "next".into(), json!({})),
        Commands::Find { query } => {
            (OpKind::Query, "tasks", "find".into(), json!({"query": query}))
        }
        Commands::Verify { action } => match action {
            VerifyAction::Set {
                id,
                gate,
                value,
                agent,
                reason,
            } => (
                OpKind::Mutate,
                "tasks",
                "verify-set".into(),
                json!({"id": id, "gate": gate, "value": value, "agent": agent, "reason": reason}),
            ),
            VerifyAction::Show { id, children } => (
                OpKind::Query,
                "tasks",
                "verify-show".into(),
                json!({"id": id, "children": children}),
            ),
        },
        Commands::Validate {
            fix,
            dry_run,
            strict,
        } => {
            if fix || dry_run {
                (
                    OpKind::Mutate,
                    "validate",
                    "fix".into(),
                    json!({"dryRun": dry_run}),
                )
            } else {
                (
                    OpKind::Query,
                    "validate",
                    "run".into(),
                    json!({"strict": strict}),
                )
            }
        }
        Commands::Doctor { strict } => (
            OpKind::Query,
            "validate",
            "doctor".into(),
            json!({"strict": strict}),
        ),
        Commands::Upgrade { dry_run } => (
            OpKind::Mutate,
            "system",
            "upgrade".into(),
            json!({"dryRun": dry_run}),
        ),
        Commands::MigrateStorage { to, dry_run } => (
            OpKind::Mutate,
            "system",
            "migrate-storage".into(),
            json!({"to": enum_str(&to), "dryRun": dry_run}),
        ),
        Commands::Sequence { action } => match action {
            SequenceAction::Show => (OpKind::Query, "system", "sequence-show".into(), json!({})),
            SequenceAction::Check => {
                (OpKind::Query, "system", "sequence-check".into(), json!({}))
            }
            SequenceAction::Repair => (
                OpKind::Mutate,
                "system",
                "sequence-repair".into(),
                json!({}),
            ),
        },
        Commands::Checkpoint => (OpKind::Mutate, "system", "checkpoint".into(), json!({})),
        Commands::Restore {
            snapshot,
            file,
            entry,
        } => (
            OpKind::Mutate,
            "system",
            "restore".into(),
            json!({"snapshot": snapshot, "file": file, "entry": entry}),
        ),
        Commands::Context { action } => match action {
            ContextAction::Report {
                session_id,
                context_window_size,
                current_usage,
            } => (
                OpKind::Mutate,
                "system",
                "context-report".into(),
                json!({
                    "sessionId": session_id,
                    "contextWindowSize": context_window_size,
                    "currentUsage": current_usage,
                }),
            ),
            ContextAction::Status { session_id, alert } => (
                OpKind::Query,
                "system",
                "context-status".into(),
                json!({"sessionId": session_id, "alert": alert}),
            ),
            ContextAction::Locks => (OpKind::Query, "system", "locks".into(), json!({})),
        },
        Commands::Log { id, limit } => (
            OpKind::Query,
            "tasks",
            "log".into(),
            json!({"id": id, "limit": limit}),
        ),
        Commands::Gateway {
            kind,
            domain,
            operation,
            params,
        } => {
            let kind = if kind == "mutate" {
                OpKind::Mutate
            } else {
                OpKind::Query
            };
            let params: Value = serde_json::from_str(&params).unwrap_or(json!({}));
            let domain: &'static str = Box::leak(domain.into_boxed_str());
            (kind, domain, operation, params)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let format = if cli.human {
        Format::Human
    } else if cli.json {
        Format::Json
    } else {
        cli.format
    };
    let verbose = cli.verbose || std::env::var("CLEO_DEBUG").is_ok();

    let (kind, domain, operation, params) = to_request(cli.command);
    if verbose {
        eprintln!("cleo: {kind} {domain}/{operation}");
    }

    let envelope = gateway::dispatch(kind, domain, &operation, &params);
    print_envelope(&envelope, format, cli.quiet);
    std::process::exit(envelope.exit_code);
}
