//! Dispatch reducer: events in, audit and notification effects out.

use super::events::LendingEvent;
use super::messages::MessageTemplates;
use lending_core::audit::{AuditEntry, AuditLog};
use lending_core::effect::Effect;
use lending_core::notification::{Channel, Notifier};
use lending_core::reducer::Reducer;
use lending_core::{SmallVec, record_audit, send_notification, smallvec};
use serde_json::json;
use std::sync::Arc;

/// Delivery counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchState {
    /// Events received
    pub published: u64,
    /// Messages delivered
    pub delivered: u64,
    /// Messages that failed
    pub failed: u64,
    /// Activity log writes that failed
    pub audit_failures: u64,
}

/// Inputs to the dispatch reducer.
#[derive(Clone, Debug)]
pub enum DispatchAction {
    /// A committed change to fan out
    Publish(LendingEvent),
    /// Feedback: a message was delivered
    Delivered {
        /// Channel used
        channel: Channel,
        /// Recipient
        recipient: String,
    },
    /// Feedback: a message could not be delivered
    DeliveryFailed {
        /// Channel used
        channel: Channel,
        /// Recipient
        recipient: String,
        /// Notifier error
        error: String,
    },
    /// Feedback: an activity log write failed
    AuditFailed {
        /// Log error
        error: String,
    },
}

/// Capabilities the dispatcher delivers through.
#[derive(Clone)]
pub struct DispatchEnvironment {
    /// Outbound messages
    pub notifier: Arc<dyn Notifier>,
    /// Activity log
    pub audit: Arc<dyn AuditLog>,
    /// Message text
    pub templates: MessageTemplates,
}

/// Turns each [`LendingEvent`] into one audit entry and its messages.
#[derive(Clone, Debug, Default)]
pub struct DispatchReducer;

impl DispatchReducer {
    fn audit_entry(event: &LendingEvent) -> AuditEntry {
        match event {
            LendingEvent::Request(e) => {
                AuditEntry::new(&e.actor, e.change.audit_action(), e.request_id.to_string(), e.at)
                    .with_details(json!({
                        "station_id": e.station_id,
                        "change": e.change,
                    }))
            },
            LendingEvent::Alert(e) => AuditEntry::new(
                "system",
                format!("alert.{}.{}", e.kind, e.notice.as_str()),
                e.station_id.to_string(),
                e.at,
            )
            .with_details(json!({
                "items": e.items,
                "recipients": e.manager_emails.len(),
            })),
        }
    }
}

impl Reducer for DispatchReducer {
    type State = DispatchState;
    type Action = DispatchAction;
    type Environment = DispatchEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            DispatchAction::Publish(event) => {
                state.published += 1;

                let messages = match &event {
                    LendingEvent::Request(e) => env.templates.for_request(e).into_iter().collect(),
                    LendingEvent::Alert(e) => {
                        if e.manager_emails.is_empty() {
                            tracing::warn!(station_id = %e.station_id, "station has no manager emails, alert not sent");
                        }
                        env.templates.for_alert(e)
                    },
                };

                let mut effects: SmallVec<[Effect<Self::Action>; 4]> = smallvec![record_audit! {
                    log: env.audit,
                    entry: Self::audit_entry(&event),
                    on_error: |error| Some(DispatchAction::AuditFailed { error: error.to_string() })
                }];

                for message in messages {
                    let channel = message.channel;
                    let recipient = message.recipient.clone();
                    let failed_recipient = recipient.clone();
                    effects.push(send_notification! {
                        notifier: env.notifier,
                        message: message,
                        on_success: || Some(DispatchAction::Delivered { channel, recipient }),
                        on_error: |error| Some(DispatchAction::DeliveryFailed {
                            channel,
                            recipient: failed_recipient,
                            error: error.to_string(),
                        })
                    });
                }

                effects
            },
            DispatchAction::Delivered { channel, .. } => {
                state.delivered += 1;
                metrics::counter!(
                    "lending_notifications_total",
                    "outcome" => "delivered",
                    "channel" => channel.to_string()
                )
                .increment(1);
                smallvec![Effect::None]
            },
            DispatchAction::DeliveryFailed {
                channel,
                recipient,
                error,
            } => {
                state.failed += 1;
                metrics::counter!(
                    "lending_notifications_total",
                    "outcome" => "failed",
                    "channel" => channel.to_string()
                )
                .increment(1);
                tracing::warn!(%channel, %recipient, %error, "notification dropped");
                smallvec![Effect::None]
            },
            DispatchAction::AuditFailed { error } => {
                state.audit_failures += 1;
                tracing::warn!(%error, "activity log entry dropped");
                smallvec![Effect::None]
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dispatch::events::{AlertEvent, AlertedItem, Notice, RequestChange, RequestEvent};
    use crate::types::{AlertKind, ItemId, RequestId, StationId};
    use chrono::Utc;
    use lending_testing::{InMemoryAuditLog, RecordingNotifier, ReducerTest, assertions};

    fn env() -> DispatchEnvironment {
        DispatchEnvironment {
            notifier: Arc::new(RecordingNotifier::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            templates: MessageTemplates::new("https://lend.example.org"),
        }
    }

    fn request_event(phone: &str) -> LendingEvent {
        LendingEvent::Request(RequestEvent {
            change: RequestChange::Submitted,
            actor: "requester".to_string(),
            request_id: RequestId::new(),
            station_id: StationId::new(),
            requester_name: "Dana".to_string(),
            requester_phone: phone.to_string(),
            token: "tok".to_string(),
            expires_at: Utc::now(),
            at: Utc::now(),
        })
    }

    fn alert_event(managers: usize) -> LendingEvent {
        LendingEvent::Alert(AlertEvent {
            station_id: StationId::new(),
            station_name: "North".to_string(),
            manager_emails: (0..managers).map(|i| format!("m{i}@x.org")).collect(),
            kind: AlertKind::LowStock,
            notice: Notice::First,
            items: vec![AlertedItem {
                item_id: ItemId::new(),
                item_name: "gloves".to_string(),
                quantity: 2,
                faulty_since: None,
                alert_count: 1,
            }],
            at: Utc::now(),
        })
    }

    #[test]
    fn request_event_audits_and_notifies_requester() {
        ReducerTest::new(DispatchReducer)
            .with_env(env())
            .given_state(DispatchState::default())
            .when_action(DispatchAction::Publish(request_event("+100")))
            .then_state(|state| assert_eq!(state.published, 1))
            .then_effects(|effects| {
                assertions::assert_has_audit_effect(effects);
                assertions::assert_notifications_count(effects, 1);
            })
            .run();
    }

    #[test]
    fn missing_phone_still_audits() {
        ReducerTest::new(DispatchReducer)
            .with_env(env())
            .given_state(DispatchState::default())
            .when_action(DispatchAction::Publish(request_event("  ")))
            .then_effects(|effects| {
                assertions::assert_has_audit_effect(effects);
                assertions::assert_notifications_count(effects, 0);
            })
            .run();
    }

    #[test]
    fn alert_fans_out_to_managers() {
        ReducerTest::new(DispatchReducer)
            .with_env(env())
            .given_state(DispatchState::default())
            .when_action(DispatchAction::Publish(alert_event(3)))
            .then_effects(|effects| assertions::assert_notifications_count(effects, 3))
            .run();
    }

    #[test]
    fn delivery_outcomes_are_counted() {
        ReducerTest::new(DispatchReducer)
            .with_env(env())
            .given_state(DispatchState {
                delivered: 4,
                ..DispatchState::default()
            })
            .when_action(DispatchAction::DeliveryFailed {
                channel: Channel::Email,
                recipient: "m@x.org".to_string(),
                error: "smtp down".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.delivered, 4);
                assert_eq!(state.failed, 1);
            })
            .run();
    }
}
