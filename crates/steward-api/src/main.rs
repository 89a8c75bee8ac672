//! Steward CLI entry point.
//!
//! Binary name: `stwd`
//!
//! Parses CLI arguments, wires the orchestrator to SQLite and the configured
//! connectors, then dispatches to a command handler or runs the daemon.

mod cli;
mod state;

use anyhow::anyhow;
use clap::Parser;
use clap_complete::generate;

use cli::{AlertCommand, Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stwd", &mut std::io::stdout());
        return Ok(());
    }

    let (daemon, otel, workers) = match &cli.command {
        Commands::Run { workers, otel } => (true, *otel, *workers),
        _ => (false, false, None),
    };
    steward_observe::tracing_setup::init_tracing(
        cli::log_directives(cli.verbose, cli.quiet, daemon),
        otel,
    )
    .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init(workers).await?;
    let result = dispatch(cli, state).await;

    steward_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: AppState) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Submit {
            kind,
            payload,
            file,
            priority,
        } => {
            let payload = cli::task::read_payload(payload.as_deref(), file.as_deref()).await?;
            cli::task::submit(&state, &kind, payload, priority, json).await
        }

        Commands::Tasks { status, limit } => cli::task::list_tasks(&state, status, limit, json).await,

        Commands::Inspect { task_id } => cli::task::inspect(&state, task_id, json).await,

        Commands::Approvals => cli::approval::list_pending(&state, json).await,

        Commands::Decide {
            request_id,
            verdict,
            edits,
            reason,
        } => {
            let decision = cli::approval::decision(verdict, edits.as_deref(), reason)?;
            cli::approval::decide(&state, request_id, decision, json).await
        }

        Commands::Escalations => cli::monitor::escalations(&state, json).await,

        Commands::Health { markdown } => cli::monitor::health(&state, markdown, json).await,

        Commands::Alerts { action } => match action {
            AlertCommand::List { all } => cli::monitor::list_alerts(&state, all, json).await,
            AlertCommand::Resolve { alert_id, note } => {
                cli::monitor::resolve_alert(&state, alert_id, note.as_deref(), json).await
            }
        },

        Commands::Maintain => cli::monitor::maintain(&state, json).await,

        Commands::Run { .. } => cli::daemon::run(state).await,

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
