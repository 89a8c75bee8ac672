//! SQLite error log repository implementation.

use chrono::{DateTime, Utc};
use sqlx::Row;
use steward_core::repository::error_log::ErrorLogRepository;
use steward_types::error::RepositoryError;
use steward_types::failure::{ErrorKind, ErrorRecord, Severity};
use uuid::Uuid;

use super::store::SqliteStore;
use super::{db_err, enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_uuid};

const ERROR_COLUMNS: &str =
    "id, dependency, kind, severity, message, task_id, step_index, attempt, occurred_at";

struct ErrorRow {
    id: String,
    dependency: String,
    kind: String,
    severity: String,
    message: String,
    task_id: Option<String>,
    step_index: Option<i64>,
    attempt: i64,
    occurred_at: String,
}

impl ErrorRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            dependency: row.try_get("dependency")?,
            kind: row.try_get("kind")?,
            severity: row.try_get("severity")?,
            message: row.try_get("message")?,
            task_id: row.try_get("task_id")?,
            step_index: row.try_get("step_index")?,
            attempt: row.try_get("attempt")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }

    fn into_record(self) -> Result<ErrorRecord, RepositoryError> {
        Ok(ErrorRecord {
            id: parse_uuid(&self.id)?,
            dependency: self.dependency,
            kind: enum_from_str::<ErrorKind>(&self.kind, "error kind")?,
            severity: enum_from_str::<Severity>(&self.severity, "severity")?,
            message: self.message,
            task_id: self.task_id.as_deref().map(parse_uuid).transpose()?,
            step_index: self.step_index.and_then(|i| u32::try_from(i).ok()),
            attempt: u32::try_from(self.attempt).unwrap_or(0),
            occurred_at: parse_datetime(&self.occurred_at)?,
        })
    }
}

fn convert(row: &sqlx::sqlite::SqliteRow) -> Result<ErrorRecord, RepositoryError> {
    ErrorRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_record()
}

impl ErrorLogRepository for SqliteStore {
    async fn append_error(&self, record: &ErrorRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO error_records
               (id, dependency, kind, severity, message, task_id, step_index, attempt, occurred_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.dependency)
        .bind(enum_to_str(&record.kind)?)
        .bind(enum_to_str(&record.severity)?)
        .bind(&record.message)
        .bind(record.task_id.map(|id| id.to_string()))
        .bind(record.step_index.map(i64::from))
        .bind(i64::from(record.attempt))
        .bind(format_datetime(&record.occurred_at))
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_errors_for_task(&self, task_id: &Uuid) -> Result<Vec<ErrorRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ERROR_COLUMNS} FROM error_records WHERE task_id = ? \
             ORDER BY occurred_at ASC, id ASC"
        ))
        .bind(task_id.to_string())
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows.iter().map(convert).collect()
    }

    async fn list_recent_errors(&self, limit: u32) -> Result<Vec<ErrorRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ERROR_COLUMNS} FROM error_records ORDER BY occurred_at DESC, id DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows.iter().map(convert).collect()
    }

    async fn count_errors_since(&self, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM error_records WHERE occurred_at >= ?")
                .bind(format_datetime(&since))
                .fetch_one(&self.pool().reader)
                .await
                .map_err(db_err)?;

        Ok(count.max(0) as u64)
    }

    async fn prune_errors(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let before = format_datetime(&before);
        let result = sqlx::query(
            r#"DELETE FROM error_records
               WHERE task_id IN (
                 SELECT id FROM tasks
                 WHERE status IN ('done', 'rejected', 'expired') AND updated_at < ?
               )
               OR (task_id IS NULL AND occurred_at < ?)"#,
        )
        .bind(&before)
        .bind(&before)
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
