//! Retry policy: exponential backoff with bounded jitter.
//!
//! Stateless apart from its configuration. The engine owns the attempt
//! counter (stored on the task as `retry_count`) and asks the policy whether
//! another attempt is allowed and how long to wait before it.

use std::time::Duration;

use rand::Rng;
use steward_types::config::RetryConfig;
use steward_types::failure::ErrorKind;

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    RetryAfter(Duration),
    /// The failure is not retryable at all.
    Fatal,
    /// Retryable, but the attempt budget is spent.
    Exhausted,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_attempts: u32,
    max_delay: Duration,
    jitter_ratio: f64,
    resource_cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_attempts: config.max_attempts.max(1),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            resource_cooldown: Duration::from_millis(config.resource_cooldown_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a further attempt is allowed after zero-based `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Wait before retrying after zero-based `attempt` failed:
    /// `base * 2^(attempt + 1)` plus `jitter_fraction * jitter_ratio` of that,
    /// capped at the maximum delay. `jitter_fraction` must be in `[0, 1)`.
    ///
    /// With a one-second base the first three failures wait 2, 4, and 8
    /// seconds plus up to 10%.
    pub fn backoff(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let exponent = (attempt + 1).min(30) as i32;
        let delay = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let jitter = delay * self.jitter_ratio * jitter_fraction.clamp(0.0, 1.0);
        let total = Duration::from_secs_f64(delay + jitter);
        total.min(self.max_delay)
    }

    /// Backoff for `kind`, with a random jitter draw. ResourceExhaustion waits
    /// at least the resource cooldown.
    pub fn delay_for(&self, kind: ErrorKind, attempt: u32) -> Duration {
        let fraction = rand::thread_rng().gen_range(0.0..1.0);
        let delay = self.backoff(attempt, fraction);
        if kind == ErrorKind::ResourceExhaustion {
            delay.max(self.resource_cooldown)
        } else {
            delay
        }
    }

    /// Decide the follow-up to a failure of `kind` on zero-based `attempt`.
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() {
            RetryDecision::Fatal
        } else if self.should_retry(attempt) {
            RetryDecision::RetryAfter(self.delay_for(kind, attempt))
        } else {
            RetryDecision::Exhausted
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
