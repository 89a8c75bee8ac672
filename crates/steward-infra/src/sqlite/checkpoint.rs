//! SQLite checkpoint repository implementation.

use chrono::{DateTime, Utc};
use sqlx::Row;
use steward_core::repository::checkpoint::CheckpointRepository;
use steward_types::checkpoint::{Checkpoint, CheckpointOutcome};
use steward_types::error::RepositoryError;
use uuid::Uuid;

use super::store::SqliteStore;
use super::{db_err, enum_from_str, enum_to_str, format_datetime, from_json, parse_datetime, parse_uuid, to_json};

struct CheckpointRow {
    task_id: String,
    step_index: i64,
    step_name: String,
    state: String,
    outcome: String,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            task_id: row.try_get("task_id")?,
            step_index: row.try_get("step_index")?,
            step_name: row.try_get("step_name")?,
            state: row.try_get("state")?,
            outcome: row.try_get("outcome")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        Ok(Checkpoint {
            task_id: parse_uuid(&self.task_id)?,
            step_index: u32::try_from(self.step_index)
                .map_err(|_| RepositoryError::Query(format!("invalid step index: {}", self.step_index)))?,
            step_name: self.step_name,
            state: from_json(&self.state, "checkpoint state")?,
            outcome: enum_from_str::<CheckpointOutcome>(&self.outcome, "checkpoint outcome")?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn convert(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, RepositoryError> {
    CheckpointRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_checkpoint()
}

impl CheckpointRepository for SqliteStore {
    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let task_id = checkpoint.task_id.to_string();
        let mut tx = self.pool().writer.begin().await.map_err(db_err)?;

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(step_index) FROM checkpoints WHERE task_id = ?")
                .bind(&task_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;

        let step_index = i64::from(checkpoint.step_index);
        if latest.is_some_and(|latest| latest >= step_index) {
            return Err(RepositoryError::Conflict(format!(
                "checkpoint {} of task {} out of order",
                checkpoint.step_index, checkpoint.task_id
            )));
        }

        sqlx::query(
            r#"INSERT INTO checkpoints (task_id, step_index, step_name, state, outcome, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&task_id)
        .bind(step_index)
        .bind(&checkpoint.step_name)
        .bind(to_json(&checkpoint.state)?)
        .bind(enum_to_str(&checkpoint.outcome)?)
        .bind(format_datetime(&checkpoint.created_at))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn latest_success(&self, task_id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT task_id, step_index, step_name, state, outcome, created_at
               FROM checkpoints WHERE task_id = ? AND outcome = 'success'
               ORDER BY step_index DESC LIMIT 1"#,
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool().reader)
        .await
        .map_err(db_err)?;

        row.as_ref().map(convert).transpose()
    }

    async fn list_checkpoints(&self, task_id: &Uuid) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT task_id, step_index, step_name, state, outcome, created_at
               FROM checkpoints WHERE task_id = ? ORDER BY step_index ASC"#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows.iter().map(convert).collect()
    }

    async fn prune_checkpoints(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"DELETE FROM checkpoints WHERE task_id IN (
                 SELECT id FROM tasks
                 WHERE status IN ('done', 'rejected', 'expired') AND updated_at < ?
               )"#,
        )
        .bind(format_datetime(&before))
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
