//! CLI workflow subcommands: validate and run.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use flowstate_core::workflow::Workflow;
use flowstate_types::execution::{ExecutionRecord, ExecutionStatus};
use serde_json::Value;

use crate::state::AppState;

/// Interval between status checks while waiting on a detached run.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Parse `--input`: inline JSON, `@path` for a file, or `{}` when absent.
pub fn parse_input(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}

fn load(file: &Path) -> Result<Workflow> {
    Workflow::load(file).with_context(|| format!("invalid workflow {}", file.display()))
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate(file: &Path, json: bool) -> Result<()> {
    let workflow = load(file)?;
    let def = workflow.definition();

    if json {
        let out = serde_json::json!({
            "name": workflow.name(),
            "valid": true,
            "start_at": def.start_at,
            "states": def.states.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("✓").green().bold(),
        style(workflow.name()).cyan()
    );
    println!("  Start at: {}", def.start_at);
    println!("  States: {}", def.states.len());
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run(
    state: &AppState,
    file: &Path,
    input: Option<&str>,
    detach: bool,
    json: bool,
) -> Result<()> {
    let workflow = load(file)?;
    let input = parse_input(input)?;

    if detach {
        let started = state.engine.start_execution(&workflow, input).await?;
        if json {
            let out = serde_json::json!({
                "execution_id": started.execution_id.to_string(),
                "job_id": started.job_id,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            println!();
            println!(
                "  {} Started execution {}",
                style("▶").green().bold(),
                style(started.execution_id).cyan()
            );
            if let Some(job_id) = &started.job_id {
                println!("  Job: {job_id}");
            }
        }
        // The execution lives on this process; wait so its outcome is recorded.
        let record = wait_for(state, &started.execution_id).await?;
        if !json {
            println!("  Finished: {}", status_styled(record.status));
            println!();
        }
        return Ok(());
    }

    let record = state.engine.run_execution(&workflow, input).await?;
    print_outcome(&record, json)?;
    if record.status != ExecutionStatus::Succeeded {
        anyhow::bail!("execution {} finished as {}", record.id, record.status);
    }
    Ok(())
}

async fn wait_for(state: &AppState, id: &uuid::Uuid) -> Result<ExecutionRecord> {
    loop {
        let record = state.engine.describe_execution(id).await?;
        if record.status.is_terminal() {
            return Ok(record);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_outcome(record: &ExecutionRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} ({})",
        status_styled(record.status),
        style(&record.workflow_name).cyan(),
        style(record.id).dim()
    );
    if let Some(output) = &record.output {
        println!();
        println!("{}", serde_json::to_string_pretty(output)?);
    }
    if let Some(failure) = &record.failure {
        println!("  Error: {}", style(&failure.error).red());
        if let Some(cause) = &failure.cause {
            println!("  Cause: {cause}");
        }
    }
    println!();
    Ok(())
}

pub fn status_styled(status: ExecutionStatus) -> console::StyledObject<&'static str> {
    match status {
        ExecutionStatus::Running => style("● running").blue(),
        ExecutionStatus::Succeeded => style("✓ succeeded").green(),
        ExecutionStatus::Failed => style("✗ failed").red(),
        ExecutionStatus::TimedOut => style("⏱ timed_out").yellow(),
        ExecutionStatus::Aborted => style("◌ aborted").dim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_input_defaults_to_empty_object() {
        assert_eq!(parse_input(None).unwrap(), json!({}));
    }

    #[test]
    fn parse_input_inline_and_file() {
        assert_eq!(parse_input(Some(r#"{"a": 1}"#)).unwrap(), json!({"a": 1}));

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("input.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let arg = format!("@{}", path.display());
        assert_eq!(parse_input(Some(&arg)).unwrap(), json!([1, 2]));
    }

    #[test]
    fn parse_input_rejects_bad_json() {
        assert!(parse_input(Some("{not json")).is_err());
        assert!(parse_input(Some("@/definitely/not/here.json")).is_err());
    }
}
