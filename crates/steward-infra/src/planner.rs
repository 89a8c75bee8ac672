//! Rule-based planner for the built-in task kinds.
//!
//! Known payload kinds map to a fixed step sequence. Opaque tasks carry
//! their own plan under `data.steps`; an opaque task without one has no
//! planning rule and fails admission.

use serde_json::{Value, json};
use steward_core::lifecycle::planner::Planner;
use steward_types::error::PlanningError;
use steward_types::task::{PlanStep, Task, TaskPayload};

#[derive(Debug, Clone, Default)]
pub struct RulePlanner;

impl RulePlanner {
    pub fn new() -> Self {
        Self
    }

    fn plan_payload(payload: &TaskPayload) -> Result<Vec<PlanStep>, PlanningError> {
        let plan = match payload {
            TaskPayload::Email { to, subject, .. } => vec![
                PlanStep::new("compose", "email.compose", "email")
                    .with_input(json!({"to": to, "subject": subject})),
                PlanStep::new("send", "email.send", "email").irreversible(),
            ],
            TaskPayload::SocialPost { platform, .. } => vec![
                PlanStep::new("draft", "social.draft", platform.as_str()),
                PlanStep::new("publish", "social.publish", platform.as_str())
                    .irreversible()
                    .with_input(json!({"platform": platform})),
            ],
            TaskPayload::Accounting {
                operation,
                reference,
                ..
            } => vec![
                PlanStep::new("validate", "accounting.validate", "accounting")
                    .with_input(json!({"operation": operation, "reference": reference})),
                PlanStep::new("post_entry", "accounting.post_entry", "accounting").irreversible(),
            ],
            TaskPayload::FileDrop { path } => vec![
                PlanStep::new("ingest", "file.ingest", "filesystem").with_input(json!({"path": path})),
            ],
            TaskPayload::Opaque { kind, data } => {
                let Some(steps) = data.get("steps") else {
                    return Err(PlanningError::UnsupportedKind(kind.clone()));
                };
                serde_json::from_value::<Vec<PlanStep>>(steps.clone())
                    .map_err(|e| PlanningError::Failed(format!("invalid steps for '{kind}': {e}")))?
            }
        };

        if plan.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }
        Ok(plan)
    }
}

impl Planner for RulePlanner {
    async fn plan(&self, task: &Task) -> Result<Vec<PlanStep>, PlanningError> {
        let plan = Self::plan_payload(&task.payload)?;
        tracing::debug!(
            task_id = %task.id,
            kind = %task.kind,
            steps = plan.len(),
            irreversible = plan.iter().filter(|s| s.irreversible).count(),
            "task planned"
        );
        Ok(plan)
    }
}

/// Steps for an opaque payload, as `{"steps": [...]}` expects them.
pub fn opaque_steps(steps: &[PlanStep]) -> Value {
    json!({ "steps": steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use steward_types::task::TaskPriority;

    fn task(kind: &str, data: Value) -> Task {
        let payload = TaskPayload::from_parts(kind, data).unwrap();
        Task::new(payload, TaskPriority::Medium, Utc::now())
    }

    #[tokio::test]
    async fn email_plan_ends_with_irreversible_send() {
        let task = task(
            "email",
            json!({"to": "a@example.com", "subject": "Hi", "body": "..."}),
        );
        let plan = RulePlanner::new().plan(&task).await.unwrap();
        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["compose", "send"]);
        assert!(!plan[0].irreversible);
        assert!(plan[1].irreversible);
        assert_eq!(plan[1].action, "email.send");
    }

    #[tokio::test]
    async fn social_post_depends_on_platform() {
        let task = task(
            "social_post",
            json!({"platform": "mastodon", "content": "hello"}),
        );
        let plan = RulePlanner::new().plan(&task).await.unwrap();
        assert!(plan.iter().all(|s| s.dependency == "mastodon"));
        assert!(plan.last().unwrap().irreversible);
    }

    #[tokio::test]
    async fn file_drop_needs_no_approval() {
        let task = task("file_drop", json!({"path": "/inbox/report.csv"}));
        let plan = RulePlanner::new().plan(&task).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert!(!plan[0].irreversible);
        assert_eq!(plan[0].dependency, "filesystem");
    }

    #[tokio::test]
    async fn opaque_plan_comes_from_payload() {
        let steps = vec![
            PlanStep::new("fetch", "crm.fetch", "crm"),
            PlanStep::new("update", "crm.update", "crm").irreversible(),
        ];
        let task = task("crm_sync", opaque_steps(&steps));
        let plan = RulePlanner::new().plan(&task).await.unwrap();
        assert_eq!(plan, steps);
    }

    #[tokio::test]
    async fn opaque_without_steps_is_unsupported() {
        let task = task("crm_sync", json!({"account": 42}));
        let err = RulePlanner::new().plan(&task).await.unwrap_err();
        assert_eq!(err, PlanningError::UnsupportedKind("crm_sync".to_string()));

        let empty = task_with_steps(json!([]));
        assert_eq!(
            RulePlanner::new().plan(&empty).await.unwrap_err(),
            PlanningError::EmptyPlan
        );

        let malformed = task_with_steps(json!([{"name": "x"}]));
        assert!(matches!(
            RulePlanner::new().plan(&malformed).await.unwrap_err(),
            PlanningError::Failed(_)
        ));
    }

    fn task_with_steps(steps: Value) -> Task {
        task("crm_sync", json!({ "steps": steps }))
    }
}
