//! SQLite circuit breaker state repository.

use sqlx::Row;
use steward_core::repository::breaker::BreakerRepository;
use steward_types::breaker::{CircuitBreakerState, CircuitState};
use steward_types::error::RepositoryError;

use super::store::SqliteStore;
use super::{db_err, enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_opt_datetime};

struct BreakerRow {
    dependency: String,
    state: String,
    consecutive_failures: i64,
    window_started_at: Option<String>,
    last_transition_at: String,
    opened_at: Option<String>,
    last_error: Option<String>,
}

impl BreakerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            dependency: row.try_get("dependency")?,
            state: row.try_get("state")?,
            consecutive_failures: row.try_get("consecutive_failures")?,
            window_started_at: row.try_get("window_started_at")?,
            last_transition_at: row.try_get("last_transition_at")?,
            opened_at: row.try_get("opened_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn into_state(self) -> Result<CircuitBreakerState, RepositoryError> {
        Ok(CircuitBreakerState {
            dependency: self.dependency,
            state: enum_from_str::<CircuitState>(&self.state, "circuit state")?,
            consecutive_failures: u32::try_from(self.consecutive_failures).unwrap_or(0),
            window_started_at: parse_opt_datetime(self.window_started_at.as_deref())?,
            last_transition_at: parse_datetime(&self.last_transition_at)?,
            opened_at: parse_opt_datetime(self.opened_at.as_deref())?,
            last_error: self.last_error,
        })
    }
}

impl BreakerRepository for SqliteStore {
    async fn save_breaker(&self, state: &CircuitBreakerState) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO circuit_breakers
               (dependency, state, consecutive_failures, window_started_at,
                last_transition_at, opened_at, last_error)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(dependency) DO UPDATE SET
                 state = excluded.state,
                 consecutive_failures = excluded.consecutive_failures,
                 window_started_at = excluded.window_started_at,
                 last_transition_at = excluded.last_transition_at,
                 opened_at = excluded.opened_at,
                 last_error = excluded.last_error"#,
        )
        .bind(&state.dependency)
        .bind(enum_to_str(&state.state)?)
        .bind(i64::from(state.consecutive_failures))
        .bind(state.window_started_at.as_ref().map(format_datetime))
        .bind(format_datetime(&state.last_transition_at))
        .bind(state.opened_at.as_ref().map(format_datetime))
        .bind(&state.last_error)
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_breakers(&self) -> Result<Vec<CircuitBreakerState>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT dependency, state, consecutive_failures, window_started_at,
                      last_transition_at, opened_at, last_error
               FROM circuit_breakers ORDER BY dependency ASC"#,
        )
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                BreakerRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_state()
            })
            .collect()
    }
}
