//! SQLite alert repository implementation.

use chrono::{DateTime, Utc};
use sqlx::Row;
use steward_core::repository::alert::AlertRepository;
use steward_types::alert::{Alert, AlertChannel};
use steward_types::error::RepositoryError;
use steward_types::failure::Severity;
use uuid::Uuid;

use super::store::SqliteStore;
use super::{
    db_err, enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_opt_datetime,
    parse_uuid,
};

const ALERT_COLUMNS: &str = "id, severity, channel, source, title, detail, task_id, created_at, \
     respond_by, delivered, resolved_at, resolution_note";

struct AlertRow {
    id: String,
    severity: String,
    channel: String,
    source: String,
    title: String,
    detail: String,
    task_id: Option<String>,
    created_at: String,
    respond_by: String,
    delivered: bool,
    resolved_at: Option<String>,
    resolution_note: Option<String>,
}

impl AlertRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            severity: row.try_get("severity")?,
            channel: row.try_get("channel")?,
            source: row.try_get("source")?,
            title: row.try_get("title")?,
            detail: row.try_get("detail")?,
            task_id: row.try_get("task_id")?,
            created_at: row.try_get("created_at")?,
            respond_by: row.try_get("respond_by")?,
            delivered: row.try_get("delivered")?,
            resolved_at: row.try_get("resolved_at")?,
            resolution_note: row.try_get("resolution_note")?,
        })
    }

    fn into_alert(self) -> Result<Alert, RepositoryError> {
        Ok(Alert {
            id: parse_uuid(&self.id)?,
            severity: enum_from_str::<Severity>(&self.severity, "severity")?,
            channel: enum_from_str::<AlertChannel>(&self.channel, "alert channel")?,
            source: self.source,
            title: self.title,
            detail: self.detail,
            task_id: self.task_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            respond_by: parse_datetime(&self.respond_by)?,
            delivered: self.delivered,
            resolved_at: parse_opt_datetime(self.resolved_at.as_deref())?,
            resolution_note: self.resolution_note,
        })
    }
}

fn convert(row: &sqlx::sqlite::SqliteRow) -> Result<Alert, RepositoryError> {
    AlertRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_alert()
}

impl AlertRepository for SqliteStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO alerts ({ALERT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(alert.id.to_string())
        .bind(enum_to_str(&alert.severity)?)
        .bind(enum_to_str(&alert.channel)?)
        .bind(&alert.source)
        .bind(&alert.title)
        .bind(&alert.detail)
        .bind(alert.task_id.map(|id| id.to_string()))
        .bind(format_datetime(&alert.created_at))
        .bind(format_datetime(&alert.respond_by))
        .bind(alert.delivered)
        .bind(alert.resolved_at.as_ref().map(format_datetime))
        .bind(&alert.resolution_note)
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_alert(&self, id: &Uuid) -> Result<Option<Alert>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool().reader)
            .await
            .map_err(db_err)?;

        row.as_ref().map(convert).transpose()
    }

    async fn list_alerts(&self, include_resolved: bool) -> Result<Vec<Alert>, RepositoryError> {
        let filter = if include_resolved {
            ""
        } else {
            "WHERE resolved_at IS NULL"
        };
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts {filter} ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows.iter().map(convert).collect()
    }

    async fn resolve_alert(
        &self,
        id: &Uuid,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE alerts SET resolved_at = ?, resolution_note = ?
               WHERE id = ? AND resolved_at IS NULL"#,
        )
        .bind(format_datetime(&at))
        .bind(note)
        .bind(id.to_string())
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn prune_alerts(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM alerts WHERE resolved_at IS NOT NULL AND resolved_at < ?")
            .bind(format_datetime(&before))
            .execute(&self.pool().writer)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
