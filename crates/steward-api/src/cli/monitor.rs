//! Operator monitoring commands: health, escalations, alerts, maintenance.

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use steward_core::monitor::render_report;
use steward_types::failure::Severity;
use steward_types::health::HealthStatus;
use uuid::Uuid;

use super::task::task_table;
use crate::state::AppState;

pub async fn health(state: &AppState, markdown: bool, json: bool) -> Result<()> {
    let report = state.orchestrator.health().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if markdown {
        println!("{}", render_report(&report));
        return Ok(());
    }

    println!();
    println!(
        "  {} Steward v{}: {}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION"),
        health_label(report.status)
    );
    println!();
    println!("  {}", style("── Components ──").dim());
    for component in &report.components {
        println!(
            "  {} {:<18} {}",
            health_mark(component.status),
            component.name,
            style(&component.detail).dim()
        );
    }
    println!();
    println!("  {}", style("── Queue ──").dim());
    println!("  Depth:        {}", style(report.queue_depth).bold());
    println!("  Failure rate: {:.1}%", report.failure_rate * 100.0);
    if !report.open_breakers.is_empty() {
        println!(
            "  Open circuits: {}",
            style(report.open_breakers.join(", ")).red()
        );
    }
    println!();
    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!("  Workers:  {}", style(state.config.workers.count).dim());
    println!();
    Ok(())
}

pub async fn escalations(state: &AppState, json: bool) -> Result<()> {
    let tasks = state.orchestrator.list_escalations().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    println!();
    if tasks.is_empty() {
        println!("  {} No escalated tasks.", style("✓").green().bold());
    } else {
        println!("{}", task_table(&tasks));
        println!();
        println!(
            "  {} escalated task{} need{} attention. Inspect with: {}",
            style(tasks.len()).red().bold(),
            if tasks.len() == 1 { "" } else { "s" },
            if tasks.len() == 1 { "s" } else { "" },
            style("stwd inspect <task_id>").yellow()
        );
    }
    println!();
    Ok(())
}

pub async fn list_alerts(state: &AppState, include_resolved: bool, json: bool) -> Result<()> {
    let alerts = state.orchestrator.list_alerts(include_resolved).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&alerts)?);
        return Ok(());
    }

    if alerts.is_empty() {
        println!();
        println!("  {} No open alerts.", style("✓").green().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Severity").fg(Color::White),
        Cell::new("Source").fg(Color::White),
        Cell::new("Title").fg(Color::White),
        Cell::new("Respond By").fg(Color::White),
        Cell::new("State").fg(Color::White),
    ]);

    for alert in &alerts {
        let state_cell = if alert.is_resolved() {
            Cell::new("resolved").fg(Color::DarkGrey)
        } else if !alert.delivered {
            Cell::new("held").fg(Color::Yellow)
        } else {
            Cell::new("open").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(alert.id).fg(Color::DarkGrey),
            severity_cell(alert.severity),
            Cell::new(&alert.source),
            Cell::new(&alert.title),
            Cell::new(alert.respond_by.format("%Y-%m-%d %H:%M UTC")),
            state_cell,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn resolve_alert(state: &AppState, id: Uuid, note: Option<&str>, json: bool) -> Result<()> {
    let resolved = state.orchestrator.resolve_alert(id, note).await?;
    if !resolved {
        bail!("alert {id} is already resolved");
    }

    if json {
        println!("{}", serde_json::json!({ "id": id, "resolved": true }));
    } else {
        println!();
        println!("  {} Alert {} resolved", style("✓").green().bold(), style(id).cyan());
        println!();
    }
    Ok(())
}

pub async fn maintain(state: &AppState, json: bool) -> Result<()> {
    let summary = state.orchestrator.run_maintenance().await?;

    if json {
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    println!();
    println!("  {} Maintenance complete", style("✓").green().bold());
    println!("  Approval steps repaired: {}", summary.repaired);
    println!("  Approvals expired:       {}", summary.expired);
    println!("  Tasks archived:          {}", summary.archived);
    println!("  Checkpoints pruned:      {}", summary.pruned);
    println!("  Error records pruned:    {}", summary.errors_pruned);
    println!("  Alerts pruned:           {}", summary.alerts_pruned);
    println!();
    Ok(())
}

fn severity_cell(severity: Severity) -> Cell {
    let color = match severity {
        Severity::Critical => Color::Red,
        Severity::High => Color::Magenta,
        Severity::Medium => Color::Yellow,
        Severity::Low => Color::DarkGrey,
    };
    Cell::new(severity).fg(color)
}

fn health_label(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => style("healthy").green().bold().to_string(),
        HealthStatus::Degraded => style("degraded").yellow().bold().to_string(),
        HealthStatus::Critical => style("critical").red().bold().to_string(),
    }
}

fn health_mark(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => style("✓").green().to_string(),
        HealthStatus::Degraded => style("!").yellow().to_string(),
        HealthStatus::Critical => style("✗").red().to_string(),
    }
}
