//! `stwd run`: the long-running orchestration daemon.

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub async fn run(state: AppState) -> Result<()> {
    state.orchestrator.startup().await?;

    println!();
    println!(
        "  {} Steward running with {} worker{}",
        style("⚡").bold(),
        style(state.config.workers.count).cyan(),
        if state.config.workers.count == 1 { "" } else { "s" }
    );
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  {}", style("Press Ctrl+C to stop").dim());
    println!();

    let cancel = CancellationToken::new();
    let daemon = tokio::spawn(state.orchestrator.clone().run(cancel.clone()));

    shutdown_signal().await;
    tracing::info!("shutdown requested, draining in-flight steps");
    cancel.cancel();
    daemon.await?;

    println!("\n  Steward stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
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
