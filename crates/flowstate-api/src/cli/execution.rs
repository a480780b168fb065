//! CLI execution subcommands: list and show.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use flowstate_types::execution::{ExecutionRecord, ExecutionStatus, TraceEvent, TraceOutcome};
use uuid::Uuid;

use crate::cli::workflow::status_styled;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// List recent executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one execution, optionally with its trace.
    Show {
        /// Execution UUID.
        id: String,

        /// Include the per-state trace.
        #[arg(long)]
        trace: bool,
    },
}

pub async fn handle_execution_command(
    cmd: ExecutionCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ExecutionCommand::List { limit } => list(state, limit, json).await,
        ExecutionCommand::Show { id, trace } => show(state, &id, trace, json).await,
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn list(state: &AppState, limit: u32, json: bool) -> Result<()> {
    let records = state.engine.list_executions(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!(
            "  {} No executions yet. Start one with: {}",
            style("i").blue().bold(),
            style("flowstate run <file>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Execution").fg(Color::White),
        Cell::new("Workflow").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Started").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
    ]);

    for record in &records {
        table.add_row(vec![
            Cell::new(record.id).fg(Color::DarkGrey),
            Cell::new(&record.workflow_name).fg(Color::Cyan),
            status_cell(record.status),
            Cell::new(record.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(duration(record.started_at, record.stopped_at)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} execution{}",
        style(records.len()).bold(),
        if records.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

fn status_cell(status: ExecutionStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        ExecutionStatus::Running => cell.fg(Color::Blue),
        ExecutionStatus::Succeeded => cell.fg(Color::Green),
        ExecutionStatus::Failed => cell.fg(Color::Red),
        ExecutionStatus::TimedOut => cell.fg(Color::Yellow),
        ExecutionStatus::Aborted => cell.fg(Color::DarkGrey),
    }
}

fn duration(started: DateTime<Utc>, stopped: Option<DateTime<Utc>>) -> String {
    match stopped {
        Some(stopped) => {
            let ms = (stopped - started).num_milliseconds().max(0);
            if ms < 1000 {
                format!("{ms}ms")
            } else {
                format!("{:.1}s", ms as f64 / 1000.0)
            }
        }
        None => "-".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

async fn show(state: &AppState, raw_id: &str, with_trace: bool, json: bool) -> Result<()> {
    let id: Uuid = raw_id
        .parse()
        .with_context(|| format!("invalid execution id '{raw_id}'"))?;
    let record = state.engine.describe_execution(&id).await?;
    let trace = if with_trace {
        Some(state.engine.get_execution_trace(&id).await?)
    } else {
        None
    };

    if json {
        let mut out = serde_json::to_value(&record)?;
        if let Some(trace) = &trace {
            out["trace"] = serde_json::to_value(trace)?;
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_record(&record)?;
    if let Some(trace) = &trace {
        print_trace(trace);
    }
    Ok(())
}

fn print_record(record: &ExecutionRecord) -> Result<()> {
    println!();
    println!(
        "  {} {}",
        style(&record.workflow_name).cyan().bold(),
        status_styled(record.status)
    );
    println!("  ID:       {}", record.id);
    println!("  Started:  {}", record.started_at.to_rfc3339());
    if let Some(stopped) = record.stopped_at {
        println!("  Stopped:  {}", stopped.to_rfc3339());
        println!("  Duration: {}", duration(record.started_at, Some(stopped)));
    }
    println!("  Input:    {}", serde_json::to_string(&record.input)?);
    if let Some(output) = &record.output {
        println!("  Output:   {}", serde_json::to_string(output)?);
    }
    if let Some(failure) = &record.failure {
        println!("  Error:    {}", style(&failure.error).red());
        if let Some(cause) = &failure.cause {
            println!("  Cause:    {cause}");
        }
    }
    println!();
    Ok(())
}

fn print_trace(trace: &[TraceEvent]) {
    if trace.is_empty() {
        println!("  {} No trace events recorded.", style("i").blue().bold());
        println!();
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Attempt").fg(Color::White),
        Cell::new("Outcome").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
    ]);

    for event in trace {
        let state = if event.path.is_empty() {
            event.state_name.clone()
        } else {
            format!("{}/{}", event.path, event.state_name)
        };
        let outcome = match &event.outcome {
            TraceOutcome::Output { .. } => Cell::new("ok").fg(Color::Green),
            TraceOutcome::Error { error, .. } => Cell::new(error).fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(event.sequence).fg(Color::DarkGrey),
            Cell::new(state).fg(Color::Cyan),
            Cell::new(&event.state_type),
            Cell::new(event.attempt),
            outcome,
            Cell::new(duration(event.started_at, Some(event.finished_at))),
        ]);
    }

    println!("{table}");
    println!();
}
