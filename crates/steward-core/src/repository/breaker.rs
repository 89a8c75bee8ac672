//! Circuit breaker state persistence.

use steward_types::breaker::CircuitBreakerState;
use steward_types::error::RepositoryError;

pub trait BreakerRepository: Send + Sync {
    /// Upsert by dependency id.
    fn save_breaker(
        &self,
        state: &CircuitBreakerState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_breakers(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<CircuitBreakerState>, RepositoryError>> + Send;
}
