//! Health monitor.
//!
//! Polls task store liveness, breaker states, queue depth, and the recent
//! task failure rate, and folds them into one `HealthReport`. A degraded
//! system gets automated recovery (forced breaker probes, plus a worker
//! restart signal on the way down); entering critical also pages a human.
//!
//! `report` only reads. `check` is the daemon's poll and is the only path
//! that records history and reacts.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use steward_types::breaker::CircuitState;
use steward_types::config::HealthConfig;
use steward_types::event::OrchestratorEvent;
use steward_types::failure::Severity;
use steward_types::health::{ComponentHealth, HealthReport, HealthStatus};
use steward_types::task::TaskStatus;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::event::bus::EventBus;
use crate::execution::worker::WORKERS_COMPONENT;
use crate::monitor::escalation::{AlertDraft, EscalationDispatcher};
use crate::recovery::breaker::CircuitBreakerRegistry;
use crate::repository::{OutcomeCounts, Store};

/// Reports kept in memory for `history()`.
const HISTORY_LIMIT: usize = 100;

/// The failure rate is judged only once this many tasks finished in the
/// window.
const MIN_FINISHED_FOR_RATE: u64 = 5;

/// Statuses counted as queued work.
const QUEUED: [TaskStatus; 4] = [
    TaskStatus::New,
    TaskStatus::Planned,
    TaskStatus::Approved,
    TaskStatus::InProgress,
];

pub struct HealthMonitor<S: Store> {
    store: S,
    breakers: Arc<CircuitBreakerRegistry<S>>,
    dispatcher: Arc<EscalationDispatcher<S>>,
    config: HealthConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    history: Mutex<VecDeque<HealthReport>>,
}

impl<S: Store> HealthMonitor<S> {
    pub fn new(
        store: S,
        breakers: Arc<CircuitBreakerRegistry<S>>,
        dispatcher: Arc<EscalationDispatcher<S>>,
        config: HealthConfig,
        clock: Arc<dyn Clock>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            breakers,
            dispatcher,
            config,
            clock,
            bus,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// Take one health reading and act on it.
    pub async fn check(&self) -> HealthReport {
        let report = self.report().await;
        let previous = self.record(&report);

        if previous != report.status {
            tracing::info!(from = %previous, to = %report.status, "system health changed");
            self.bus.publish(OrchestratorEvent::HealthChanged {
                from: previous,
                to: report.status,
            });
        }

        if report.status >= HealthStatus::Degraded {
            self.recover(&report, previous).await;
        }
        if report.status == HealthStatus::Critical && previous != HealthStatus::Critical {
            self.page(&report).await;
        }
        report
    }

    /// Poll until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.check().await;
                    tracing::debug!(status = %report.status, queue_depth = report.queue_depth, "health check");
                }
            }
        }
    }

    /// Most recent reports, oldest first.
    pub fn history(&self) -> Vec<HealthReport> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<HealthReport> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Measurement
    // -----------------------------------------------------------------------

    /// Measure current health without side effects. Breaker states come
    /// from the store, so a report taken outside the daemon sees what the
    /// daemon persisted.
    pub async fn report(&self) -> HealthReport {
        let now = self.clock.now();
        let mut components = Vec::with_capacity(4);

        let queue_depth = match self.store.count_by_status().await {
            Ok(counts) => {
                components.push(component("task_store", HealthStatus::Healthy, "reachable".to_string()));
                let depth: u64 = counts
                    .iter()
                    .filter(|(status, _)| QUEUED.contains(status))
                    .map(|(_, count)| count)
                    .sum();
                Some(depth)
            }
            Err(e) => {
                components.push(component("task_store", HealthStatus::Critical, e.to_string()));
                None
            }
        };

        let open_breakers = match self.store.list_breakers().await {
            Ok(states) => {
                let mut open: Vec<String> = states
                    .into_iter()
                    .filter(|s| s.state != CircuitState::Closed)
                    .map(|s| s.dependency)
                    .collect();
                open.sort();
                open
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read breaker states, using in-memory view");
                self.breakers.unavailable_dependencies()
            }
        };
        let breaker_status = if open_breakers.len() >= self.config.critical_open_breakers.max(1) {
            HealthStatus::Critical
        } else if !open_breakers.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let breaker_detail = if open_breakers.is_empty() {
            "all closed".to_string()
        } else {
            format!("unavailable: {}", open_breakers.join(", "))
        };
        components.push(component("circuit_breakers", breaker_status, breaker_detail));

        if let Some(depth) = queue_depth {
            let status = threshold(
                depth as f64,
                self.config.degraded_queue_depth as f64,
                self.config.critical_queue_depth as f64,
            );
            components.push(component("queue", status, format!("{depth} queued")));
        }

        let since = now - self.config.failure_window();
        let failure_rate = match self.store.outcome_counts_since(since).await {
            Ok(counts) => {
                components.push(self.failure_component(counts));
                counts.failure_rate()
            }
            Err(e) => {
                components.push(component("task_failures", HealthStatus::Degraded, e.to_string()));
                0.0
            }
        };

        HealthReport {
            status: HealthReport::aggregate(&components),
            components,
            open_breakers,
            queue_depth: queue_depth.unwrap_or(0),
            failure_rate,
            checked_at: now,
        }
    }

    fn failure_component(&self, counts: OutcomeCounts) -> ComponentHealth {
        let finished = counts.succeeded + counts.failed;
        let rate = counts.failure_rate();
        let status = if finished < MIN_FINISHED_FOR_RATE {
            HealthStatus::Healthy
        } else {
            threshold(
                rate,
                self.config.degraded_failure_rate,
                self.config.critical_failure_rate,
            )
        };
        component(
            "task_failures",
            status,
            format!("{} of {finished} finished tasks failed ({:.0}%)", counts.failed, rate * 100.0),
        )
    }

    /// Append to history; returns the previous overall status.
    fn record(&self, report: &HealthReport) -> HealthStatus {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let previous = history
            .back()
            .map(|r| r.status)
            .unwrap_or(HealthStatus::Healthy);
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(report.clone());
        previous
    }

    // -----------------------------------------------------------------------
    // Reactions
    // -----------------------------------------------------------------------

    async fn recover(&self, report: &HealthReport, previous: HealthStatus) {
        let mut probes = 0;
        for dependency in &report.open_breakers {
            if self.breakers.force_probe(dependency).await {
                probes += 1;
            }
        }
        if previous == HealthStatus::Healthy {
            tracing::warn!(status = %report.status, probes, "automated recovery triggered");
            self.bus.publish(OrchestratorEvent::RestartRequested {
                component: WORKERS_COMPONENT.to_string(),
            });
        } else if probes > 0 {
            tracing::debug!(probes, "forced circuit probes");
        }
    }

    async fn page(&self, report: &HealthReport) {
        let failing: Vec<String> = report
            .components
            .iter()
            .filter(|c| c.status == HealthStatus::Critical)
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        let draft = AlertDraft {
            severity: Severity::Critical,
            source: "health_monitor".to_string(),
            title: "system health critical".to_string(),
            detail: failing.join("; "),
            task_id: None,
        };
        if let Err(e) = self.dispatcher.dispatch(draft).await {
            tracing::error!(error = %e, "failed to dispatch health alert");
        }
    }
}

fn component(name: &str, status: HealthStatus, detail: String) -> ComponentHealth {
    ComponentHealth {
        name: name.to_string(),
        status,
        detail,
    }
}

fn threshold(value: f64, degraded: f64, critical: f64) -> HealthStatus {
    if value >= critical {
        HealthStatus::Critical
    } else if value >= degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Render a report as a markdown summary.
pub fn render_report(report: &HealthReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Health: {}", report.status);
    let _ = writeln!(out);
    let _ = writeln!(out, "Checked at {}", report.checked_at.to_rfc3339());
    let _ = writeln!(out);
    let _ = writeln!(out, "| Component | Status | Detail |");
    let _ = writeln!(out, "|---|---|---|");
    for c in &report.components {
        let _ = writeln!(out, "| {} | {} | {} |", c.name, c.status, c.detail);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "- Queue depth: {}", report.queue_depth);
    let _ = writeln!(out, "- Failure rate: {:.1}%", report.failure_rate * 100.0);
    if report.open_breakers.is_empty() {
        let _ = writeln!(out, "- Open breakers: none");
    } else {
        let _ = writeln!(out, "- Open breakers: {}", report.open_breakers.join(", "));
    }
    out
}
