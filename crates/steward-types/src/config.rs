//! Configuration types for Steward.
//!
//! `StewardConfig` represents the top-level `config.toml`. Every field has a
//! default, so an empty or missing file yields a working configuration. One
//! time unit is one second: `base_delay_ms = 1000`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `{data_dir}/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StewardConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Webhook connectors keyed by action (e.g. "email.send").
    #[serde(default)]
    pub connectors: BTreeMap<String, WebhookConfig>,
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter, as a fraction of the delay.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Minimum wait after a ResourceExhaustion failure.
    #[serde(default = "default_resource_cooldown_ms")]
    pub resource_cooldown_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_resource_cooldown_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            resource_cooldown_ms: default_resource_cooldown_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// How long an unanswered half-open probe blocks further probes. Must
    /// outlast the per-step timeout.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    300
}

impl BreakerConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }

    pub fn probe_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.probe_timeout_secs as i64)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Approval
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_window_hours() -> u64 {
    72
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl ApprovalConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-call timeout for connector invocations.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_step_timeout_secs() -> u64 {
    120
}

impl WorkerConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            lease_ttl_secs: default_lease_ttl_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_poll_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_degraded_failure_rate")]
    pub degraded_failure_rate: f64,
    #[serde(default = "default_critical_failure_rate")]
    pub critical_failure_rate: f64,
    #[serde(default = "default_degraded_queue_depth")]
    pub degraded_queue_depth: u64,
    #[serde(default = "default_critical_queue_depth")]
    pub critical_queue_depth: u64,
    #[serde(default = "default_failure_window_minutes")]
    pub failure_window_minutes: u64,
    #[serde(default = "default_critical_open_breakers")]
    pub critical_open_breakers: usize,
}

fn default_health_poll_secs() -> u64 {
    30
}

fn default_degraded_failure_rate() -> f64 {
    0.2
}

fn default_critical_failure_rate() -> f64 {
    0.5
}

fn default_degraded_queue_depth() -> u64 {
    100
}

fn default_critical_queue_depth() -> u64 {
    500
}

fn default_failure_window_minutes() -> u64 {
    60
}

fn default_critical_open_breakers() -> usize {
    3
}

impl HealthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn failure_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.failure_window_minutes as i64)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_health_poll_secs(),
            degraded_failure_rate: default_degraded_failure_rate(),
            critical_failure_rate: default_critical_failure_rate(),
            degraded_queue_depth: default_degraded_queue_depth(),
            critical_queue_depth: default_critical_queue_depth(),
            failure_window_minutes: default_failure_window_minutes(),
            critical_open_breakers: default_critical_open_breakers(),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts / retention
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Non-critical alerts delivered per minute; Critical always delivers.
    #[serde(default = "default_max_alerts_per_minute")]
    pub max_alerts_per_minute: u32,
}

fn default_max_alerts_per_minute() -> u32 {
    10
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_alerts_per_minute: default_max_alerts_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_checkpoint_retention_days")]
    pub checkpoint_retention_days: u64,
}

fn default_checkpoint_retention_days() -> u64 {
    30
}

impl RetentionConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.checkpoint_retention_days as i64)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            checkpoint_retention_days: default_checkpoint_retention_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// An HTTP endpoint that executes one plan action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Environment variable holding a bearer token, re-read on credential refresh.
    #[serde(default)]
    pub token_env: Option<String>,
}
