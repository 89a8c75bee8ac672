//! SQLite task repository implementation.
//!
//! Every status change is a single guarded UPDATE on the writer connection;
//! `rows_affected() == 1` tells the caller whether its compare-and-set won.

use chrono::{DateTime, Utc};
use sqlx::Row;
use steward_core::repository::task::{OutcomeCounts, TaskRepository};
use steward_types::error::RepositoryError;
use steward_types::task::{PlanStep, Task, TaskPayload, TaskPriority, TaskStatus};
use uuid::Uuid;

use super::store::SqliteStore;
use super::{
    db_err, format_datetime, from_json, parse_datetime, parse_opt_datetime,
    parse_uuid, to_json,
};

const TASK_COLUMNS: &str = "id, kind, payload, status, priority, plan, approval_required, \
     retry_count, lease_owner, lease_expires_at, not_before, last_error, created_at, \
     updated_at, archived_at";

/// Statuses no step will ever run from again, as an SQL list.
const TERMINAL_SQL: &str = "('done', 'rejected', 'expired', 'failed', 'escalated')";

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct TaskRow {
    id: String,
    kind: String,
    payload: String,
    status: String,
    priority: String,
    plan: String,
    approval_required: bool,
    retry_count: i64,
    lease_owner: Option<String>,
    lease_expires_at: Option<String>,
    not_before: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    archived_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            plan: row.try_get("plan")?,
            approval_required: row.try_get("approval_required")?,
            retry_count: row.try_get("retry_count")?,
            lease_owner: row.try_get("lease_owner")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            not_before: row.try_get("not_before")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            archived_at: row.try_get("archived_at")?,
        })
    }

    fn into_task(self) -> Result<Task, RepositoryError> {
        Ok(Task {
            id: parse_uuid(&self.id)?,
            kind: self.kind,
            payload: from_json(&self.payload, "payload")?,
            status: self
                .status
                .parse::<TaskStatus>()
                .map_err(|_| RepositoryError::Query(format!("invalid status: {}", self.status)))?,
            priority: self
                .priority
                .parse::<TaskPriority>()
                .map_err(RepositoryError::Query)?,
            plan: from_json(&self.plan, "plan")?,
            approval_required: self.approval_required,
            retry_count: u32::try_from(self.retry_count).unwrap_or(0),
            lease_owner: self.lease_owner,
            lease_expires_at: parse_opt_datetime(self.lease_expires_at.as_deref())?,
            not_before: parse_opt_datetime(self.not_before.as_deref())?,
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            archived_at: parse_opt_datetime(self.archived_at.as_deref())?,
        })
    }
}

fn rows_to_tasks(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Task>, RepositoryError> {
    rows.iter()
        .map(|row| {
            TaskRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_task()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// TaskRepository
// ---------------------------------------------------------------------------

impl TaskRepository for SqliteStore {
    async fn insert_task(&self, task: &Task) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO tasks
               (id, kind, payload, status, priority, priority_rank, plan, approval_required,
                retry_count, lease_owner, lease_expires_at, not_before, last_error,
                created_at, updated_at, archived_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(&task.kind)
        .bind(to_json(&task.payload)?)
        .bind(task.status.as_str())
        .bind(task.priority.to_string())
        .bind(task.priority.rank())
        .bind(to_json(&task.plan)?)
        .bind(task.approval_required)
        .bind(i64::from(task.retry_count))
        .bind(&task.lease_owner)
        .bind(task.lease_expires_at.as_ref().map(format_datetime))
        .bind(task.not_before.as_ref().map(format_datetime))
        .bind(&task.last_error)
        .bind(format_datetime(&task.created_at))
        .bind(format_datetime(&task.updated_at))
        .bind(task.archived_at.as_ref().map(format_datetime))
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_task(&self, id: &Uuid) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool().reader)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => {
                let task_row =
                    TaskRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(task_row.into_task()?))
            }
            None => Ok(None),
        }
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError> {
        let filtered = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?"
        );
        let all = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, id DESC LIMIT ?");

        let query = match status {
            Some(status) => sqlx::query(&filtered).bind(status.as_str()),
            None => sqlx::query(&all),
        };
        let rows = query
            .bind(i64::from(limit))
            .fetch_all(&self.pool().reader)
            .await
            .map_err(db_err)?;

        rows_to_tasks(&rows)
    }

    async fn transition(
        &self,
        id: &Uuid,
        from: TaskStatus,
        to: TaskStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let sql = if to.is_terminal() {
            r#"UPDATE tasks
               SET status = ?, last_error = COALESCE(?, last_error), updated_at = ?,
                   lease_owner = NULL, lease_expires_at = NULL, not_before = NULL
               WHERE id = ? AND status = ?"#
        } else {
            r#"UPDATE tasks
               SET status = ?, last_error = COALESCE(?, last_error), updated_at = ?
               WHERE id = ? AND status = ?"#
        };

        let result = sqlx::query(sql)
            .bind(to.as_str())
            .bind(reason)
            .bind(format_datetime(&at))
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(&self.pool().writer)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn attach_plan(
        &self,
        id: &Uuid,
        plan: &[PlanStep],
        approval_required: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE tasks
               SET status = 'planned', plan = ?, approval_required = ?, updated_at = ?
               WHERE id = ? AND status = 'new'"#,
        )
        .bind(to_json(&plan)?)
        .bind(approval_required)
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn replace_payload(
        &self,
        id: &Uuid,
        payload: &TaskPayload,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE tasks SET payload = ?, updated_at = ? WHERE id = ? AND status = 'pending_approval'",
        )
        .bind(to_json(payload)?)
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn begin_execution(
        &self,
        id: &Uuid,
        worker: &str,
        lease_expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE tasks
               SET status = 'in_progress', lease_owner = ?, lease_expires_at = ?, updated_at = ?
               WHERE id = ? AND status = 'approved'"#,
        )
        .bind(worker)
        .bind(format_datetime(&lease_expires_at))
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn acquire_lease(
        &self,
        id: &Uuid,
        worker: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now_str = format_datetime(&now);
        let result = sqlx::query(
            r#"UPDATE tasks
               SET lease_owner = ?, lease_expires_at = ?, updated_at = ?
               WHERE id = ? AND status = 'in_progress'
                 AND (lease_owner IS NULL OR lease_owner = ?
                      OR lease_expires_at IS NULL OR lease_expires_at <= ?)
                 AND (not_before IS NULL OR not_before <= ?)"#,
        )
        .bind(worker)
        .bind(format_datetime(&lease_expires_at))
        .bind(&now_str)
        .bind(id.to_string())
        .bind(worker)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(
        &self,
        id: &Uuid,
        worker: &str,
        not_before: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE tasks
               SET lease_owner = NULL, lease_expires_at = NULL, not_before = ?, updated_at = ?
               WHERE id = ? AND lease_owner = ?"#,
        )
        .bind(not_before.as_ref().map(format_datetime))
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .bind(worker)
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE tasks
               SET lease_owner = NULL, lease_expires_at = NULL
               WHERE lease_owner IS NOT NULL AND lease_expires_at < ?"#,
        )
        .bind(format_datetime(&now))
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn set_retry_state(
        &self,
        id: &Uuid,
        retry_count: u32,
        last_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"UPDATE tasks
               SET retry_count = ?, last_error = COALESCE(?, last_error), updated_at = ?
               WHERE id = ?"#,
        )
        .bind(i64::from(retry_count))
        .bind(last_error)
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_runnable(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError> {
        let now_str = format_datetime(&now);
        let rows = sqlx::query(&format!(
            r#"SELECT {TASK_COLUMNS} FROM tasks
               WHERE status = 'approved'
                  OR (status = 'in_progress'
                      AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
                      AND (not_before IS NULL OR not_before <= ?))
               ORDER BY priority_rank ASC, created_at ASC, id ASC
               LIMIT ?"#
        ))
        .bind(&now_str)
        .bind(&now_str)
        .bind(i64::from(limit))
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows_to_tasks(&rows)
    }

    async fn count_by_status(&self) -> Result<Vec<(TaskStatus, u64)>, RepositoryError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tasks GROUP BY status")
            .fetch_all(&self.pool().reader)
            .await
            .map_err(db_err)?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.try_get("status").map_err(db_err)?;
            let n: i64 = row.try_get("n").map_err(db_err)?;
            let status = status
                .parse::<TaskStatus>()
                .map_err(|_| RepositoryError::Query(format!("invalid status: {status}")))?;
            counts.push((status, n.max(0) as u64));
        }
        // Lifecycle order rather than whatever GROUP BY produced.
        counts.sort_by_key(|(status, _)| TaskStatus::ALL.iter().position(|s| s == status));
        Ok(counts)
    }

    async fn outcome_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<OutcomeCounts, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT
                 COALESCE(SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), 0) AS succeeded,
                 COALESCE(SUM(CASE WHEN status IN ('failed', 'escalated') THEN 1 ELSE 0 END), 0) AS failed
               FROM tasks WHERE updated_at >= ?"#,
        )
        .bind(format_datetime(&since))
        .fetch_one(&self.pool().reader)
        .await
        .map_err(db_err)?;

        let succeeded: i64 = row.try_get("succeeded").map_err(db_err)?;
        let failed: i64 = row.try_get("failed").map_err(db_err)?;
        Ok(OutcomeCounts {
            succeeded: succeeded.max(0) as u64,
            failed: failed.max(0) as u64,
        })
    }

    async fn archive_terminal(
        &self,
        before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        // updated_at stays put: checkpoint pruning keys off it.
        let result = sqlx::query(&format!(
            r#"UPDATE tasks SET archived_at = ?
               WHERE status IN {TERMINAL_SQL} AND archived_at IS NULL AND updated_at < ?"#
        ))
        .bind(format_datetime(&at))
        .bind(format_datetime(&before))
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
