//! Text of outbound messages.

use super::events::{AlertEvent, Notice, RequestChange, RequestEvent};
use crate::types::AlertKind;
use lending_core::notification::{Channel, OutboundMessage};
use std::fmt::Write as _;

/// Renders requester and manager messages.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    base_url: String,
}

impl MessageTemplates {
    /// Templates whose links point at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public status page for a token.
    #[must_use]
    pub fn status_url(&self, token: &str) -> String {
        format!("{}/status/{token}", self.base_url)
    }

    /// WhatsApp message to the requester, if the change warrants one.
    #[must_use]
    pub fn for_request(&self, event: &RequestEvent) -> Option<OutboundMessage> {
        let greeting = format!("Hello {},", event.requester_name);
        let mut body = match &event.change {
            RequestChange::Submitted => {
                format!("{greeting} we received your equipment request. Follow it here:")
            },
            RequestChange::PickedUp => {
                format!("{greeting} your equipment request was approved and is ready. Details:")
            },
            RequestChange::Rejected { reason } => match reason {
                Some(reason) => {
                    format!("{greeting} your equipment request was declined: {reason}")
                },
                None => format!("{greeting} your equipment request was declined."),
            },
            RequestChange::Cancelled | RequestChange::PickupUndone => {
                format!("{greeting} your equipment request was cancelled.")
            },
            RequestChange::Regenerated | RequestChange::TokenResent => {
                format!("{greeting} here is your link to follow your equipment request:")
            },
            RequestChange::Expired => format!(
                "{greeting} your request link has expired. Please ask the station to send you a new one."
            ),
        };

        if event.change.carries_link() {
            let _ = write!(body, " {}", self.status_url(&event.token));
            if matches!(
                event.change,
                RequestChange::Regenerated | RequestChange::TokenResent
            ) {
                let _ = write!(
                    body,
                    " (valid until {})",
                    event.expires_at.format("%Y-%m-%d %H:%M UTC")
                );
            }
        }

        if event.requester_phone.trim().is_empty() {
            return None;
        }
        Some(OutboundMessage::new(
            Channel::WhatsApp,
            event.requester_phone.clone(),
            "Equipment request",
            body,
        ))
    }

    /// One email per station manager.
    #[must_use]
    pub fn for_alert(&self, event: &AlertEvent) -> Vec<OutboundMessage> {
        let subject = alert_subject(event);
        let body = alert_body(event);
        event
            .manager_emails
            .iter()
            .filter(|email| !email.trim().is_empty())
            .map(|email| OutboundMessage::new(Channel::Email, email.clone(), subject.clone(), body.clone()))
            .collect()
    }
}

fn alert_subject(event: &AlertEvent) -> String {
    let what = match event.kind {
        AlertKind::LowStock => "Low stock",
        AlertKind::FaultyEquipment => "Faulty equipment",
    };
    match event.notice {
        Notice::First => format!("[{}] {what}", event.station_name),
        Notice::FollowUp => format!("[{}] Reminder: {what}", event.station_name),
    }
}

fn alert_body(event: &AlertEvent) -> String {
    let mut body = match (event.kind, event.notice) {
        (AlertKind::LowStock, Notice::First) => {
            "The following items are running low:\n".to_string()
        },
        (AlertKind::LowStock, Notice::FollowUp) => {
            "The following items are still running low:\n".to_string()
        },
        (AlertKind::FaultyEquipment, Notice::First) => {
            "The following items have been faulty for a long time:\n".to_string()
        },
        (AlertKind::FaultyEquipment, Notice::FollowUp) => {
            "The following items are still faulty:\n".to_string()
        },
    };

    for item in &event.items {
        let _ = match (event.kind, item.faulty_since) {
            (AlertKind::FaultyEquipment, Some(since)) => writeln!(
                body,
                "- {} (faulty since {})",
                item.item_name,
                since.format("%Y-%m-%d")
            ),
            _ => writeln!(body, "- {}: {} left", item.item_name, item.quantity),
        };
    }
    body
}
