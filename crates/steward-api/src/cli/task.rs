//! Producer-facing task commands: submit, list, inspect.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use steward_types::checkpoint::CheckpointOutcome;
use steward_types::task::{Task, TaskPriority, TaskStatus};
use uuid::Uuid;

use crate::state::AppState;

/// Read the payload from `--payload` or `--file`; no payload means `{}`.
pub async fn read_payload(inline: Option<&str>, file: Option<&Path>) -> Result<Value> {
    let raw = match (inline, file) {
        (Some(inline), _) => inline.to_string(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => return Ok(Value::Object(Default::default())),
    };
    serde_json::from_str(&raw).context("payload is not valid JSON")
}

pub async fn submit(
    state: &AppState,
    kind: &str,
    payload: Value,
    priority: TaskPriority,
    json: bool,
) -> Result<()> {
    let id = state.orchestrator.submit(kind, payload, priority).await?;
    let audit = state.orchestrator.inspect(id).await?;
    let task = &audit.task;

    if json {
        println!("{}", serde_json::to_string_pretty(task)?);
        return Ok(());
    }

    println!();
    match task.status {
        TaskStatus::Failed => println!(
            "  {} Task {} could not be planned: {}",
            style("✗").red().bold(),
            style(id).cyan(),
            task.last_error.as_deref().unwrap_or("unknown error")
        ),
        TaskStatus::PendingApproval => {
            let irreversible = task.plan.iter().filter(|s| s.irreversible).count();
            println!(
                "  {} Task {} awaits approval ({} irreversible step{})",
                style("?").yellow().bold(),
                style(id).cyan(),
                irreversible,
                if irreversible == 1 { "" } else { "s" }
            );
            if let Some(request) = audit.approvals.last() {
                println!(
                    "    Decide with: {}",
                    style(format!("stwd decide {} approve", request.id)).yellow()
                );
            }
        }
        _ => println!(
            "  {} Task {} accepted ({} step{}, {})",
            style("✓").green().bold(),
            style(id).cyan(),
            task.plan.len(),
            if task.plan.len() == 1 { "" } else { "s" },
            status_label(task.status)
        ),
    }
    println!();
    Ok(())
}

pub async fn list_tasks(
    state: &AppState,
    status: Option<TaskStatus>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let tasks = state.orchestrator.list_tasks(status, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!();
        println!(
            "  {} No tasks found. Submit one with: {}",
            style("i").blue().bold(),
            style("stwd submit <kind> --payload '<json>'").yellow()
        );
        println!();
        return Ok(());
    }

    println!();
    println!("{}", task_table(&tasks));
    println!();
    println!(
        "  {} task{}",
        style(tasks.len()).bold(),
        if tasks.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

pub async fn inspect(state: &AppState, task_id: Uuid, json: bool) -> Result<()> {
    let audit = state.orchestrator.inspect(task_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&audit)?);
        return Ok(());
    }

    let task = &audit.task;
    println!();
    println!(
        "  {} {} task {}",
        style("▸").bold(),
        style(&task.kind).cyan(),
        style(task.id).dim()
    );
    println!();
    println!("  Status:    {}", status_label(task.status));
    println!("  Priority:  {}", task.priority);
    println!("  Created:   {}", task.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Updated:   {}", task.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if task.retry_count > 0 {
        println!("  Retries:   {}", style(task.retry_count).yellow());
    }
    if let Some(owner) = &task.lease_owner {
        println!("  Leased by: {owner}");
    }
    if let Some(error) = &task.last_error {
        println!("  Last error: {}", style(error).red());
    }
    println!();

    println!("  {}", style("── Plan ──").dim());
    let committed = audit
        .checkpoints
        .iter()
        .filter(|c| c.outcome == CheckpointOutcome::Success)
        .count();
    for (index, step) in task.plan.iter().enumerate() {
        let mark = match audit.checkpoints.iter().find(|c| c.step_index as usize == index) {
            Some(c) if c.outcome == CheckpointOutcome::Success => style("✓").green(),
            Some(_) => style("✗").red(),
            None => style("·").dim(),
        };
        println!(
            "  {mark} {}. {} ({}{})",
            index + 1,
            step.name,
            step.action,
            if step.irreversible { ", irreversible" } else { "" }
        );
    }
    println!("  {committed}/{} steps committed", task.plan.len());
    println!();

    if !audit.errors.is_empty() {
        println!("  {}", style("── Errors ──").dim());
        for error in &audit.errors {
            println!(
                "  {} [{}] {} attempt {}: {}",
                error.occurred_at.format("%H:%M:%S"),
                error.kind,
                error.dependency,
                error.attempt + 1,
                error.message
            );
        }
        println!();
    }

    if !audit.approvals.is_empty() {
        println!("  {}", style("── Approvals ──").dim());
        for request in &audit.approvals {
            println!(
                "  {} {} (expires {})",
                request.id,
                request.status,
                request.expires_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        println!();
    }

    Ok(())
}

pub fn task_table(tasks: &[Task]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Kind").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Priority").fg(Color::White),
        Cell::new("Steps").fg(Color::White),
        Cell::new("Last Error").fg(Color::White),
    ]);

    for task in tasks {
        let error = task.last_error.as_deref().unwrap_or("");
        let error = if error.chars().count() > 50 {
            format!("{}...", error.chars().take(47).collect::<String>())
        } else {
            error.to_string()
        };

        table.add_row(vec![
            Cell::new(task.id).fg(Color::DarkGrey),
            Cell::new(&task.kind).fg(Color::Cyan),
            status_cell(task.status),
            Cell::new(task.priority),
            Cell::new(task.plan.len()),
            Cell::new(error),
        ]);
    }
    table
}

fn status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Done => Color::Green,
        TaskStatus::InProgress | TaskStatus::Approved => Color::Cyan,
        TaskStatus::PendingApproval => Color::Yellow,
        TaskStatus::Failed | TaskStatus::Escalated => Color::Red,
        _ => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

fn status_label(status: TaskStatus) -> String {
    let text = status.to_string();
    match status {
        TaskStatus::Done => style(text).green().to_string(),
        TaskStatus::Failed | TaskStatus::Escalated => style(text).red().to_string(),
        TaskStatus::PendingApproval => style(text).yellow().to_string(),
        _ => style(text).cyan().to_string(),
    }
}
