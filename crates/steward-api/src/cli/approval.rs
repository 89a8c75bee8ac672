//! Operator approval commands.

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use steward_types::approval::ApprovalDecision;
use uuid::Uuid;

use super::Verdict;
use crate::state::AppState;

pub async fn list_pending(state: &AppState, json: bool) -> Result<()> {
    let pending = state.orchestrator.list_pending_approvals().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!();
        println!("  {} Nothing awaits approval.", style("✓").green().bold());
        println!();
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Request").fg(Color::White),
        Cell::new("Task").fg(Color::White),
        Cell::new("Action").fg(Color::White),
        Cell::new("Expires In").fg(Color::White),
    ]);

    for request in &pending {
        let remaining = request.expires_at - now;
        let expires = if remaining.num_hours() >= 1 {
            Cell::new(format!("{}h", remaining.num_hours()))
        } else {
            Cell::new(format!("{}m", remaining.num_minutes().max(0))).fg(Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(request.id).fg(Color::Cyan),
            Cell::new(request.task_id).fg(Color::DarkGrey),
            Cell::new(&request.action_summary),
            expires,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} pending request{}",
        style(pending.len()).bold(),
        if pending.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

/// Build the decision from CLI flags. Edits are parsed as JSON.
pub fn decision(verdict: Verdict, edits: Option<&str>, reason: Option<String>) -> Result<ApprovalDecision> {
    Ok(match verdict {
        Verdict::Approve => ApprovalDecision::Approve {
            edits: edits
                .map(serde_json::from_str)
                .transpose()
                .context("--edits is not valid JSON")?,
        },
        Verdict::Reject => ApprovalDecision::Reject { reason },
    })
}

pub async fn decide(state: &AppState, request_id: Uuid, decision: ApprovalDecision, json: bool) -> Result<()> {
    let task = state.orchestrator.decide(request_id, decision).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Task {} is now {}",
        style("✓").green().bold(),
        style(task.id).cyan(),
        style(task.status).bold()
    );
    println!();
    Ok(())
}
