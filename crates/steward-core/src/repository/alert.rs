//! Alert persistence.

use chrono::{DateTime, Utc};
use steward_types::alert::Alert;
use steward_types::error::RepositoryError;
use uuid::Uuid;

pub trait AlertRepository: Send + Sync {
    fn insert_alert(
        &self,
        alert: &Alert,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_alert(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Alert>, RepositoryError>> + Send;

    /// Newest first. Resolved alerts are included only when asked.
    fn list_alerts(
        &self,
        include_resolved: bool,
    ) -> impl std::future::Future<Output = Result<Vec<Alert>, RepositoryError>> + Send;

    /// Mark an open alert resolved. Returns `false` if already resolved.
    fn resolve_alert(
        &self,
        id: &Uuid,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete alerts resolved before `before`. Open alerts are never pruned.
    fn prune_alerts(
        &self,
        before: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
