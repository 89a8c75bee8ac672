//! Failure recovery: classification, retry backoff, and circuit breaking.

pub mod breaker;
pub mod classifier;
pub mod retry;

pub use breaker::{Admission, CircuitBreaker, CircuitBreakerRegistry};
pub use classifier::{ConnectorError, classify};
pub use retry::{RetryDecision, RetryPolicy};
