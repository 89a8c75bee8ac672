//! SQLite approval request repository implementation.
//!
//! At most one pending request per task is enforced by a partial unique
//! index, so a duplicate insert surfaces as `RepositoryError::Conflict`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use steward_core::repository::approval::ApprovalRepository;
use steward_types::approval::{ApprovalRequest, ApprovalStatus};
use steward_types::error::RepositoryError;
use uuid::Uuid;

use super::store::SqliteStore;
use super::{
    db_err, enum_from_str, enum_to_str, format_datetime, from_json, parse_datetime,
    parse_opt_datetime, parse_uuid, to_json,
};

const APPROVAL_COLUMNS: &str =
    "id, task_id, action_summary, status, edits, created_at, expires_at, decided_at";

struct ApprovalRow {
    id: String,
    task_id: String,
    action_summary: String,
    status: String,
    edits: Option<String>,
    created_at: String,
    expires_at: String,
    decided_at: Option<String>,
}

impl ApprovalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            action_summary: row.try_get("action_summary")?,
            status: row.try_get("status")?,
            edits: row.try_get("edits")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            decided_at: row.try_get("decided_at")?,
        })
    }

    fn into_request(self) -> Result<ApprovalRequest, RepositoryError> {
        Ok(ApprovalRequest {
            id: parse_uuid(&self.id)?,
            task_id: parse_uuid(&self.task_id)?,
            action_summary: self.action_summary,
            status: enum_from_str::<ApprovalStatus>(&self.status, "approval status")?,
            edits: self
                .edits
                .as_deref()
                .map(|s| from_json::<Value>(s, "approval edits"))
                .transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            expires_at: parse_datetime(&self.expires_at)?,
            decided_at: parse_opt_datetime(self.decided_at.as_deref())?,
        })
    }
}

fn convert(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    ApprovalRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_request()
}

impl ApprovalRepository for SqliteStore {
    async fn insert_approval(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO approval_requests
               (id, task_id, action_summary, status, edits, created_at, expires_at, decided_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(request.id.to_string())
        .bind(request.task_id.to_string())
        .bind(&request.action_summary)
        .bind(enum_to_str(&request.status)?)
        .bind(request.edits.as_ref().map(to_json).transpose()?)
        .bind(format_datetime(&request.created_at))
        .bind(format_datetime(&request.expires_at))
        .bind(request.decided_at.as_ref().map(format_datetime))
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool().reader)
        .await
        .map_err(db_err)?;

        row.as_ref().map(convert).transpose()
    }

    async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows.iter().map(convert).collect()
    }

    async fn list_approvals_for_task(
        &self,
        task_id: &Uuid,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE task_id = ? \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(task_id.to_string())
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows.iter().map(convert).collect()
    }

    async fn resolve_approval(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        edits: Option<&Value>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE approval_requests SET status = ?, edits = ?, decided_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(edits.map(to_json).transpose()?)
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .execute(&self.pool().writer)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_expired_approvals(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests \
             WHERE status = 'pending' AND expires_at <= ? ORDER BY expires_at ASC"
        ))
        .bind(format_datetime(&now))
        .fetch_all(&self.pool().reader)
        .await
        .map_err(db_err)?;

        rows.iter().map(convert).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_support::test_store;
    use chrono::{Duration, SubsecRound};
    use serde_json::json;
    use steward_core::repository::task::TaskRepository;
    use steward_types::task::{Task, TaskPayload, TaskPriority};

    async fn seeded_task(store: &SqliteStore, now: DateTime<Utc>) -> Task {
        let payload =
            TaskPayload::from_parts("social_post", json!({"platform": "mastodon", "content": "hi"}))
                .unwrap();
        let task = Task::new(payload, TaskPriority::Medium, now);
        store.insert_task(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_one_pending_request_per_task() {
        let (store, _dir) = test_store().await;
        let now = Utc::now().trunc_subsecs(6);
        let task = seeded_task(&store, now).await;

        let first = ApprovalRequest::new(task.id, "publish", now, Duration::hours(24));
        store.insert_approval(&first).await.unwrap();
        let second = ApprovalRequest::new(task.id, "publish", now, Duration::hours(24));
        let err = store.insert_approval(&second).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        // Once resolved, a new request may be opened.
        assert!(
            store
                .resolve_approval(&first.id, ApprovalStatus::Rejected, None, now)
                .await
                .unwrap()
        );
        store.insert_approval(&second).await.unwrap();
        assert_eq!(store.list_approvals_for_task(&task.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_is_compare_and_set() {
        let (store, _dir) = test_store().await;
        let now = Utc::now().trunc_subsecs(6);
        let task = seeded_task(&store, now).await;
        let request = ApprovalRequest::new(task.id, "publish", now, Duration::hours(24));
        store.insert_approval(&request).await.unwrap();

        let edits = json!({"platform": "mastodon", "content": "edited"});
        assert!(
            store
                .resolve_approval(&request.id, ApprovalStatus::Approved, Some(&edits), now)
                .await
                .unwrap()
        );
        assert!(
            !store
                .resolve_approval(&request.id, ApprovalStatus::Rejected, None, now)
                .await
                .unwrap()
        );

        let loaded = store.get_approval(&request.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ApprovalStatus::Approved);
        assert_eq!(loaded.edits, Some(edits));
        assert_eq!(loaded.decided_at, Some(now));
        assert!(store.list_pending_approvals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_includes_deadline_instant() {
        let (store, _dir) = test_store().await;
        let now = Utc::now().trunc_subsecs(6);
        let task = seeded_task(&store, now).await;
        let request = ApprovalRequest::new(task.id, "publish", now, Duration::hours(24));
        store.insert_approval(&request).await.unwrap();

        let before = now + Duration::hours(24) - Duration::seconds(1);
        assert!(store.list_expired_approvals(before).await.unwrap().is_empty());
        let expired = store
            .list_expired_approvals(now + Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, request.id);
    }
}
