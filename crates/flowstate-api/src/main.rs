//! Flowstate CLI and REST API entry point.
//!
//! Binary name: `flowstate`
//!
//! Parses CLI arguments, initializes tracing, the database and the engine,
//! then dispatches to the command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use flowstate_observe::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowstate", &mut std::io::stdout());
        return Ok(());
    }

    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info,flowstate=debug",
        _ => "trace",
    };
    let options = TracingOptions {
        enable_otel: cli.otel,
        format: if cli.log_json { LogFormat::Json } else { LogFormat::Pretty },
        default_filter: default_filter.to_string(),
    };
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Validation is pure; no data directory or database involved
    if let Commands::Validate { file } = &cli.command {
        return cli::workflow::validate(file, cli.json);
    }

    let state = AppState::init(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run { file, input, detach } => {
            cli::workflow::run(&state, &file, input.as_deref(), detach, cli.json).await?;
        }

        Commands::Executions { action } => {
            cli::execution::handle_execution_command(action, &state, cli.json).await?;
        }

        Commands::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| state.engine.config().server.bind.clone());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;

            println!(
                "  {} Flowstate API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!(
                "  {} workflow{} from {}",
                console::style(state.workflows.len()).bold(),
                if state.workflows.len() == 1 { "" } else { "s" },
                state.data_dir.display()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Validate { .. } | Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
