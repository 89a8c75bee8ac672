//! Escalation dispatcher: turns unrecoverable conditions into alerts.
//!
//! Every alert is persisted. Delivery to its channel is rate limited per
//! minute for non-critical severities; critical alerts always deliver. A
//! held-back alert stays listable with `delivered = false`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use steward_types::alert::{Alert, AlertChannel};
use steward_types::config::AlertConfig;
use steward_types::error::RepositoryError;
use steward_types::event::OrchestratorEvent;
use steward_types::failure::Severity;
use uuid::Uuid;

use crate::clock::Clock;
use crate::event::bus::EventBus;
use crate::repository::AlertRepository;

/// An alert before it is assigned an id, channel, and deadline.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub severity: Severity,
    pub source: String,
    pub title: String,
    pub detail: String,
    pub task_id: Option<Uuid>,
}

#[derive(Debug)]
struct RateWindow {
    started_at: Option<DateTime<Utc>>,
    delivered: u32,
}

pub struct EscalationDispatcher<S: AlertRepository> {
    store: S,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    max_per_minute: u32,
    window: Mutex<RateWindow>,
}

impl<S: AlertRepository> EscalationDispatcher<S> {
    pub fn new(store: S, config: &AlertConfig, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            clock,
            max_per_minute: config.max_alerts_per_minute,
            window: Mutex::new(RateWindow {
                started_at: None,
                delivered: 0,
            }),
        }
    }

    pub async fn dispatch(&self, draft: AlertDraft) -> Result<Alert, RepositoryError> {
        let now = self.clock.now();
        let delivered = draft.severity == Severity::Critical || self.take_slot(now);
        let respond_by = now
            + chrono::Duration::from_std(draft.severity.response_target())
                .unwrap_or_else(|_| chrono::Duration::zero());

        let alert = Alert {
            id: Uuid::now_v7(),
            severity: draft.severity,
            channel: AlertChannel::for_severity(draft.severity),
            source: draft.source,
            title: draft.title,
            detail: draft.detail,
            task_id: draft.task_id,
            created_at: now,
            respond_by,
            delivered,
            resolved_at: None,
            resolution_note: None,
        };
        self.store.insert_alert(&alert).await?;

        if delivered {
            self.deliver(&alert);
        } else {
            tracing::debug!(alert_id = %alert.id, severity = %alert.severity, "alert delivery rate limited");
        }
        Ok(alert)
    }

    pub async fn list_alerts(&self, include_resolved: bool) -> Result<Vec<Alert>, RepositoryError> {
        self.store.list_alerts(include_resolved).await
    }

    /// Resolve an open alert. Returns `false` if it was already resolved.
    pub async fn resolve(&self, id: Uuid, note: Option<&str>) -> Result<bool, RepositoryError> {
        if self.store.get_alert(&id).await?.is_none() {
            return Err(RepositoryError::NotFound);
        }
        let resolved = self.store.resolve_alert(&id, note, self.clock.now()).await?;
        if resolved {
            tracing::info!(alert_id = %id, note, "alert resolved");
        }
        Ok(resolved)
    }

    fn take_slot(&self, now: DateTime<Utc>) -> bool {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = window
            .started_at
            .is_none_or(|started| now - started >= chrono::Duration::minutes(1));
        if fresh {
            window.started_at = Some(now);
            window.delivered = 0;
        }
        if window.delivered < self.max_per_minute {
            window.delivered += 1;
            true
        } else {
            false
        }
    }

    fn deliver(&self, alert: &Alert) {
        match alert.channel {
            AlertChannel::ActionItem => tracing::error!(
                alert_id = %alert.id,
                task_id = ?alert.task_id,
                source = %alert.source,
                detail = %alert.detail,
                "ACTION REQUIRED: {}",
                alert.title
            ),
            AlertChannel::Email => tracing::warn!(
                alert_id = %alert.id,
                task_id = ?alert.task_id,
                severity = %alert.severity,
                respond_by = %alert.respond_by,
                detail = %alert.detail,
                "operator notification: {}",
                alert.title
            ),
            AlertChannel::Log => tracing::info!(
                alert_id = %alert.id,
                detail = %alert.detail,
                "{}",
                alert.title
            ),
        }
        self.bus.publish(OrchestratorEvent::AlertDispatched {
            alert_id: alert.id,
            severity: alert.severity,
            title: alert.title.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::MemoryStore;

    fn draft(severity: Severity) -> AlertDraft {
        AlertDraft {
            severity,
            source: "engine".to_string(),
            title: "task escalated".to_string(),
            detail: "timeout x3".to_string(),
            task_id: None,
        }
    }

    fn dispatcher(limit: u32) -> (EscalationDispatcher<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dispatcher = EscalationDispatcher::new(
            MemoryStore::default(),
            &AlertConfig {
                max_alerts_per_minute: limit,
            },
            clock.clone(),
            EventBus::new(16),
        );
        (dispatcher, clock)
    }

    #[tokio::test]
    async fn alert_gets_channel_and_deadline_from_severity() {
        let (dispatcher, clock) = dispatcher(10);
        let alert = dispatcher.dispatch(draft(Severity::Medium)).await.unwrap();
        assert_eq!(alert.channel, AlertChannel::Email);
        assert_eq!(alert.respond_by, clock.now() + chrono::Duration::hours(4));
        assert!(alert.delivered);

        let alert = dispatcher.dispatch(draft(Severity::Critical)).await.unwrap();
        assert_eq!(alert.channel, AlertChannel::ActionItem);
        assert_eq!(alert.respond_by, clock.now());
    }

    #[tokio::test]
    async fn rate_limit_holds_back_non_critical_only() {
        let (dispatcher, clock) = dispatcher(2);
        assert!(dispatcher.dispatch(draft(Severity::Low)).await.unwrap().delivered);
        assert!(dispatcher.dispatch(draft(Severity::High)).await.unwrap().delivered);
        assert!(!dispatcher.dispatch(draft(Severity::High)).await.unwrap().delivered);
        assert!(dispatcher.dispatch(draft(Severity::Critical)).await.unwrap().delivered);

        // Held-back alerts are still persisted.
        assert_eq!(dispatcher.list_alerts(false).await.unwrap().len(), 4);

        clock.advance(chrono::Duration::seconds(61));
        assert!(dispatcher.dispatch(draft(Severity::High)).await.unwrap().delivered);
    }

    #[tokio::test]
    async fn resolve_is_one_shot() {
        let (dispatcher, _clock) = dispatcher(10);
        let alert = dispatcher.dispatch(draft(Severity::High)).await.unwrap();
        assert!(dispatcher.resolve(alert.id, Some("restarted smtp relay")).await.unwrap());
        assert!(!dispatcher.resolve(alert.id, None).await.unwrap());
        assert!(dispatcher.list_alerts(false).await.unwrap().is_empty());

        let all = dispatcher.list_alerts(true).await.unwrap();
        assert_eq!(all[0].resolution_note.as_deref(), Some("restarted smtp relay"));

        assert!(matches!(
            dispatcher.resolve(Uuid::now_v7(), None).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
