//! Broadcast event bus for distributing `OrchestratorEvent` to subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing with no active subscribers is a no-op.
//! Services that care about one kind of event take a [`Subscription`], which
//! hands back only the events its selector accepts.

use steward_types::event::OrchestratorEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Multi-consumer event bus for orchestrator events.
///
/// Cloning the bus clones the sender, allowing multiple producers and consumers.
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events `select` maps to a value; the rest are skipped.
    pub fn subscribe_filtered<T>(
        &self,
        select: impl Fn(OrchestratorEvent) -> Option<T> + Send + Sync + 'static,
    ) -> Subscription<T> {
        Subscription {
            events: self.sender.subscribe(),
            select: Box::new(select),
        }
    }

    /// Restart requests addressed to `component`.
    pub fn restart_requests(&self, component: &str) -> Subscription<()> {
        let component = component.to_string();
        self.subscribe_filtered(move |event| match event {
            OrchestratorEvent::RestartRequested { component: target } if target == component => Some(()),
            _ => None,
        })
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.sender.send(event);
    }
}

/// A typed view of the bus.
pub struct Subscription<T> {
    events: broadcast::Receiver<OrchestratorEvent>,
    select: Box<dyn Fn(OrchestratorEvent) -> Option<T> + Send + Sync>,
}

impl<T> Subscription<T> {
    /// Next selected event, or `None` once every bus handle is dropped.
    ///
    /// Cancel-safe. Events lost to lag are skipped with a debug log.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if let Some(value) = (self.select)(event) {
                        return Some(value);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "subscriber lagged behind event bus");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
