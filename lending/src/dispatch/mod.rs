//! Post-commit side effects.
//!
//! Lifecycle and escalation code publish a [`LendingEvent`] after their
//! writes commit. The [`Dispatcher`] runs [`DispatchReducer`] on the runtime
//! `Store`, which executes the resulting audit and notification effects on
//! background tasks. Publishing never fails and never waits for delivery.

pub mod events;
pub mod messages;
pub mod reducer;

pub use events::{AlertEvent, AlertedItem, LendingEvent, Notice, RequestChange, RequestEvent};
pub use messages::MessageTemplates;
pub use reducer::{DispatchAction, DispatchEnvironment, DispatchReducer, DispatchState};

use lending_runtime::{Store, StoreError};
use std::time::Duration;

type DispatchStore = Store<DispatchState, DispatchAction, DispatchEnvironment, DispatchReducer>;

/// Fire-and-forget publisher of [`LendingEvent`]s.
#[derive(Clone)]
pub struct Dispatcher {
    store: DispatchStore,
}

impl Dispatcher {
    /// Dispatcher delivering through `environment`.
    #[must_use]
    pub fn new(environment: DispatchEnvironment) -> Self {
        Self {
            store: Store::new(DispatchState::default(), DispatchReducer, environment),
        }
    }

    /// Hand an event to the dispatcher. Delivery happens in the background.
    pub async fn publish(&self, event: impl Into<LendingEvent>) {
        let event = event.into();
        let subject = event.subject_id();
        if let Err(error) = self.store.send(DispatchAction::Publish(event)).await {
            tracing::warn!(%subject, %error, "event dropped by dispatcher");
        }
    }

    /// Wait until every queued audit write and message has finished.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if deliveries are still running.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), StoreError> {
        self.store.wait_idle(timeout).await
    }

    /// Stop accepting events and drain in-flight deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if deliveries outlive `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.store.shutdown(timeout).await
    }

    /// Delivery counters so far.
    pub async fn stats(&self) -> DispatchState {
        self.store.state(Clone::clone).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{RequestId, StationId};
    use chrono::Utc;
    use lending_testing::{InMemoryAuditLog, RecordingNotifier};
    use std::sync::Arc;

    fn event() -> RequestEvent {
        RequestEvent {
            change: RequestChange::Cancelled,
            actor: "alice".to_string(),
            request_id: RequestId::new(),
            station_id: StationId::new(),
            requester_name: "Dana".to_string(),
            requester_phone: "+100".to_string(),
            token: "tok".to_string(),
            expires_at: Utc::now(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failed_delivery_is_counted_not_raised() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let audit = Arc::new(InMemoryAuditLog::new());
        let dispatcher = Dispatcher::new(DispatchEnvironment {
            notifier: notifier.clone(),
            audit: audit.clone(),
            templates: MessageTemplates::new("https://x"),
        });

        let event = event();
        let subject = event.request_id.to_string();
        dispatcher.publish(event).await;
        dispatcher.wait_idle(Duration::from_secs(1)).await.unwrap();

        let stats = dispatcher.stats().await;
        assert_eq!((stats.published, stats.delivered, stats.failed), (1, 0, 1));
        assert_eq!(notifier.attempts().len(), 1);
        assert_eq!(audit.entries_for(&subject).len(), 1);
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_dropped_quietly() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let dispatcher = Dispatcher::new(DispatchEnvironment {
            notifier: Arc::new(RecordingNotifier::new()),
            audit: audit.clone(),
            templates: MessageTemplates::new("https://x"),
        });

        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
        dispatcher.publish(event()).await;
        assert!(audit.entries().is_empty());
    }
}
