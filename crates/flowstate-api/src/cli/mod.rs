//! CLI command definitions and dispatch for the `flowstate` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod execution;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run declarative workflows against HTTP task endpoints.
#[derive(Parser)]
#[command(name = "flowstate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a config file (default: flowstate.toml in the data directory).
    #[arg(long, global = true, env = "FLOWSTATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit log events as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate a workflow definition without running it.
    Validate {
        /// Path to a JSON or YAML definition.
        file: PathBuf,
    },

    /// Run a workflow definition from a file.
    Run {
        /// Path to a JSON or YAML definition.
        file: PathBuf,

        /// Execution input as JSON, or `@path` to read it from a file.
        #[arg(long, short)]
        input: Option<String>,

        /// Print the execution id as soon as it starts instead of the output.
        #[arg(long = "async")]
        detach: bool,
    },

    /// Start the REST API server.
    Serve {
        /// Address to bind (overrides `server.bind`).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Inspect recorded executions.
    #[command(alias = "exec")]
    Executions {
        #[command(subcommand)]
        action: execution::ExecutionCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
