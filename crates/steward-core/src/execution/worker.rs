//! Worker pool: N cooperative loops pulling runnable tasks from the store.
//!
//! Workers share nothing but the engine; mutual exclusion comes from the
//! task lease. Cancellation is observed between steps, so a step in flight
//! always finishes (and checkpoints) before its worker exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::execution::engine::ExecutionEngine;
use crate::repository::Store;

/// Component name the health monitor uses to ask for a worker restart.
pub const WORKERS_COMPONENT: &str = "workers";

/// How many runnable candidates a worker examines per poll.
const CANDIDATE_BATCH: u32 = 16;

pub struct WorkerPool {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    worker_ids: Vec<String>,
}

impl WorkerPool {
    /// Spawn `count` workers plus a supervisor that re-runs lease recovery
    /// whenever a restart of the workers is requested on the bus.
    pub fn start<S: Store>(
        engine: Arc<ExecutionEngine<S>>,
        bus: &EventBus,
        count: usize,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let mut tasks = JoinSet::new();
        let prefix = Uuid::now_v7().simple().to_string();
        let prefix = &prefix[prefix.len() - 8..];

        let worker_ids: Vec<String> = (0..count.max(1)).map(|n| format!("{prefix}-{n}")).collect();
        for worker_id in &worker_ids {
            tasks.spawn(worker_loop(
                engine.clone(),
                worker_id.clone(),
                poll_interval,
                cancel.clone(),
            ));
        }
        tasks.spawn(supervise(engine, bus.clone(), cancel.clone()));

        tracing::info!(workers = worker_ids.len(), "worker pool started");
        Self {
            cancel,
            tasks,
            worker_ids,
        }
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Stop taking new steps and wait for in-flight steps to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

async fn worker_loop<S: Store>(
    engine: Arc<ExecutionEngine<S>>,
    worker_id: String,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(worker = %worker_id, "worker started");
    while !cancel.is_cancelled() {
        match engine.run_once(&worker_id, CANDIDATE_BATCH).await {
            Ok(Some((task_id, outcome))) => {
                tracing::debug!(worker = %worker_id, task_id = %task_id, outcome = ?outcome, "step turn finished");
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(worker = %worker_id, error = %e, "step turn failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    tracing::debug!(worker = %worker_id, "worker stopped");
}

async fn supervise<S: Store>(engine: Arc<ExecutionEngine<S>>, bus: EventBus, cancel: CancellationToken) {
    let mut restarts = bus.restart_requests(WORKERS_COMPONENT);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = restarts.recv() => {
                if request.is_none() {
                    break;
                }
                match engine.recover().await {
                    Ok(resumable) => tracing::info!(
                        resumable = resumable.len(),
                        "workers restarted from last checkpoints"
                    ),
                    Err(e) => tracing::error!(error = %e, "worker recovery failed"),
                }
            }
        }
    }
}
