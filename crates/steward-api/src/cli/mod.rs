//! CLI command definitions for the `stwd` binary.
//!
//! Producers submit tasks; operators review approvals, escalations, alerts
//! and health; `stwd run` starts the orchestration daemon.

pub mod approval;
pub mod daemon;
pub mod monitor;
pub mod task;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use steward_types::task::{TaskPriority, TaskStatus};
use uuid::Uuid;

/// Run and supervise autonomous business tasks.
#[derive(Parser)]
#[command(name = "stwd", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a task for planning and execution.
    Submit {
        /// Task kind (email, social_post, accounting, file_drop, or any custom kind).
        kind: String,

        /// Payload as an inline JSON document.
        #[arg(long, conflicts_with = "file")]
        payload: Option<String>,

        /// Read the JSON payload from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Scheduling priority.
        #[arg(long, short, default_value = "medium")]
        priority: TaskPriority,
    },

    /// List tasks, newest first.
    #[command(alias = "ls")]
    Tasks {
        /// Only tasks in this status (e.g. in_progress, escalated).
        #[arg(long, short)]
        status: Option<TaskStatus>,

        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Show a task with its checkpoints, errors, and approvals.
    Inspect {
        task_id: Uuid,
    },

    /// List approval requests awaiting a decision.
    Approvals,

    /// Approve or reject a pending approval request.
    Decide {
        /// Approval request id.
        request_id: Uuid,

        verdict: Verdict,

        /// Replacement payload (JSON) applied when approving.
        #[arg(long, conflicts_with = "reason")]
        edits: Option<String>,

        /// Reason recorded when rejecting.
        #[arg(long)]
        reason: Option<String>,
    },

    /// List escalated tasks that need a human.
    Escalations,

    /// Check system health.
    Health {
        /// Print the report as a markdown summary.
        #[arg(long)]
        markdown: bool,
    },

    /// Manage alerts raised by escalation.
    Alerts {
        #[command(subcommand)]
        action: AlertCommand,
    },

    /// Expire overdue approvals, archive finished tasks, prune checkpoints.
    Maintain,

    /// Run the orchestration daemon until interrupted.
    Run {
        /// Override the number of workers from config.toml.
        #[arg(long)]
        workers: Option<usize>,

        /// Export tracing spans through OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Verdict {
    Approve,
    Reject,
}

#[derive(Subcommand)]
pub enum AlertCommand {
    /// List alerts, newest first.
    List {
        /// Include resolved alerts.
        #[arg(long)]
        all: bool,
    },

    /// Mark an alert resolved.
    Resolve {
        alert_id: Uuid,

        /// Resolution note.
        #[arg(long)]
        note: Option<String>,
    },
}

/// Tracing directives for the chosen verbosity.
pub fn log_directives(verbose: u8, quiet: bool, daemon: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 if daemon => "info",
        0 => "warn",
        1 => "info,steward_core=debug,steward_infra=debug,stwd=debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_submit_with_priority() {
        let cli = Cli::try_parse_from([
            "stwd",
            "submit",
            "file_drop",
            "--payload",
            r#"{"path": "/inbox/a.csv"}"#,
            "-p",
            "critical",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit { kind, priority, .. } => {
                assert_eq!(kind, "file_drop");
                assert_eq!(priority, TaskPriority::Critical);
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn parses_decide_and_status_filter() {
        let id = Uuid::now_v7();
        let cli = Cli::try_parse_from(["stwd", "decide", &id.to_string(), "reject", "--reason", "typo"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Decide { verdict: Verdict::Reject, .. }
        ));

        let cli = Cli::try_parse_from(["stwd", "tasks", "--status", "in_progress"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Tasks { status: Some(TaskStatus::InProgress), .. }
        ));
    }

    #[test]
    fn verbosity_maps_to_directives() {
        assert_eq!(log_directives(0, true, true), "error");
        assert_eq!(log_directives(0, false, true), "info");
        assert_eq!(log_directives(0, false, false), "warn");
        assert_eq!(log_directives(2, false, false), "trace");
    }
}
