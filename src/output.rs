use clap::ValueEnum;
use colored::Colorize;
use serde_json::Value;

use crate::gateway::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Human,
    Minimal,
}

fn style_status(status: &str, padded: String) -> String {
    match status {
        "pending" => padded.yellow().to_string(),
        "active" => padded.blue().to_string(),
        "blocked" => padded.red().to_string(),
        "done" => padded.green().to_string(),
        "cancelled" => padded.dimmed().to_string(),
        _ => padded,
    }
}

fn style_priority(priority: &str, padded: String) -> String {
    match priority {
        "critical" => padded.red().bold().to_string(),
        "high" => padded.red().to_string(),
        "medium" => padded.yellow().to_string(),
        "low" => padded.green().to_string(),
        _ => padded,
    }
}

fn display_width(text: &str) -> usize {
    text.chars().count()
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        let keep: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{keep}...")
    } else {
        text.to_string()
    }
}

fn build_border(left: char, middle: char, right: char, widths: &[usize]) -> String {
    let mut line = String::new();
    line.push(left);
    for (idx, width) in widths.iter().enumerate() {
        line.push_str(&"─".repeat(*width + 2));
        if idx + 1 < widths.len() {
            line.push(middle);
        }
    }
    line.push(right);
    line
}

fn print_row(cells: &[String]) {
    let mut line = String::from("│");
    for cell in cells {
        line.push(' ');
        line.push_str(cell);
        line.push(' ');
        line.push('│');
    }
    println!("{line}");
}

fn task_row(task: &Value) -> [String; 5] {
    [
        task["displayId"].as_str().unwrap_or("-").to_string(),
        truncate(task["title"].as_str().unwrap_or("-"), 40),
        task["status"].as_str().unwrap_or("-").to_string(),
        task["priority"].as_str().unwrap_or("-").to_string(),
        task["phase"].as_str().unwrap_or("-").to_string(),
    ]
}

fn print_task_table(tasks: &[Value]) {
    let headers = ["ID", "TITLE", "STATUS", "PRIORITY", "PHASE"];
    let rows: Vec<[String; 5]> = tasks.iter().map(task_row).collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h)).collect();
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    println!("{}", build_border('┌', '┬', '┐', &widths).dimmed());
    let header_cells: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(idx, h)| format!("{:<width$}", h, width = widths[idx]).bold().to_string())
        .collect();
    print_row(&header_cells);
    println!("{}", build_border('├', '┼', '┤', &widths).dimmed());

    for row in &rows {
        let cells = [
            format!("{:>width$}", row[0], width = widths[0]).cyan().to_string(),
            format!("{:<width$}", row[1], width = widths[1]),
            style_status(&row[2], format!("{:<width$}", row[2], width = widths[2])),
            style_priority(&row[3], format!("{:<width$}", row[3], width = widths[3])),
            format!("{:<width$}", row[4], width = widths[4]).dimmed().to_string(),
        ];
        print_row(&cells);
    }
    println!("{}", build_border('└', '┴', '┘', &widths).dimmed());
}

fn print_minimal(tasks: &[Value]) {
    for task in tasks {
        let row = task_row(task);
        println!("{:>6} {:<40} {:<10} {}", row[0], row[1], row[2], row[3]);
    }
}

fn extract_tasks(data: &Value) -> Option<Vec<Value>> {
    data.get("tasks")
        .and_then(|t| t.as_array())
        .map(|tasks| tasks.to_vec())
}

fn print_human(envelope: &Envelope) {
    let body = &envelope.body;
    if body["success"] == Value::Bool(true) {
        if let Some(message) = body["message"].as_str() {
            if envelope.exit_code >= 100 {
                println!("{}", message.dimmed());
            } else {
                println!("{message}");
            }
        }
        let data = &body["data"];
        if let Some(tasks) = extract_tasks(data) {
            if !tasks.is_empty() {
                print_task_table(&tasks);
            }
        } else if data.get("displayId").is_some() {
            print_task_table(std::slice::from_ref(data));
        } else if !data.is_null() && body["message"].is_null() {
            println!(
                "{}",
                serde_json::to_string_pretty(data).unwrap_or_default()
            );
        }
    } else {
        let error = &body["error"];
        eprintln!(
            "{} {}",
            "error:".red().bold(),
            error["message"].as_str().unwrap_or("unknown error")
        );
        if let Some(fix) = error["fix"].as_str() {
            eprintln!("  {} {fix}", "fix:".yellow());
        }
        if let Some(alternatives) = error["alternatives"].as_array() {
            for alt in alternatives {
                if let (Some(action), Some(command)) =
                    (alt["action"].as_str(), alt["command"].as_str())
                {
                    eprintln!("  {} {action}: {command}", "try:".yellow());
                }
            }
        }
    }
}

/// Print the gateway envelope in the requested format. JSON mode emits
/// the envelope verbatim, which is the machine contract.
pub fn print_envelope(envelope: &Envelope, format: Format, quiet: bool) {
    if quiet && envelope.body["success"] == Value::Bool(true) {
        return;
    }
    match format {
        Format::Json => {
            let rendered = serde_json::to_string(&envelope.body).unwrap_or_default();
            if envelope.body["success"] == Value::Bool(true) {
                println!("{rendered}");
            } else {
                eprintln!("{rendered}");
            }
        }
        Format::Human => print_human(envelope),
        Format::Minimal => {
            if envelope.body["success"] == Value::Bool(true) {
                if let Some(tasks) = extract_tasks(&envelope.body["data"]) {
                    print_minimal(&tasks);
                } else if let Some(message) = envelope.body["message"].as_str() {
                    println!("{message}");
                }
            } else {
                eprintln!(
                    "error: {}",
                    envelope.body["error"]["message"].as_str().unwrap_or("?")
                );
            }
        }
    }
}
