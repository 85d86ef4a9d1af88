//! Domain events emitted after a lifecycle or escalation change commits.

use crate::types::{AlertKind, EquipmentRequest, ItemId, RequestId, StationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestChange {
    /// Created in `pending` with a fresh token
    Submitted,
    /// Inventory committed and equipment handed over
    PickedUp,
    /// Declined by a manager
    Rejected {
        /// Reason given, if any
        reason: Option<String>,
    },
    /// Withdrawn before pickup
    Cancelled,
    /// New token issued
    Regenerated,
    /// Pickup compensated, inventory restored
    PickupUndone,
    /// Existing token sent again
    TokenResent,
    /// Token lapsed without a decision
    Expired,
}

impl RequestChange {
    /// Activity log action name.
    #[must_use]
    pub const fn audit_action(&self) -> &'static str {
        match self {
            Self::Submitted => "request.submitted",
            Self::PickedUp => "request.approved",
            Self::Rejected { .. } => "request.rejected",
            Self::Cancelled => "request.cancelled",
            Self::Regenerated => "request.token_regenerated",
            Self::PickupUndone => "request.pickup_undone",
            Self::TokenResent => "request.token_resent",
            Self::Expired => "request.expired",
        }
    }

    /// Whether the change carries a link the requester needs.
    #[must_use]
    pub const fn carries_link(&self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::Regenerated | Self::TokenResent | Self::PickedUp
        )
    }
}

/// A committed change to one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestEvent {
    /// What changed
    pub change: RequestChange,
    /// Who did it (`system` for scheduled work)
    pub actor: String,
    /// Request
    pub request_id: RequestId,
    /// Station
    pub station_id: StationId,
    /// Requester name
    pub requester_name: String,
    /// Requester phone (WhatsApp recipient)
    pub requester_phone: String,
    /// Current token, used to build the status link
    pub token: String,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
    /// When the change committed
    pub at: DateTime<Utc>,
}

impl RequestEvent {
    /// Event for `request` as it stands after the change.
    #[must_use]
    pub fn new(
        change: RequestChange,
        actor: impl Into<String>,
        request: &EquipmentRequest,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            change,
            actor: actor.into(),
            request_id: request.id,
            station_id: request.station_id,
            requester_name: request.requester_name.clone(),
            requester_phone: request.requester_phone.clone(),
            token: request.token.clone(),
            expires_at: request.expires_at,
            at,
        }
    }
}

/// Which message of an escalation batch this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// Subjects raised for the first time
    First,
    /// Subjects still open after the follow-up interval
    FollowUp,
}

impl Notice {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::FollowUp => "follow_up",
        }
    }
}

/// One subject listed in an alert message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertedItem {
    /// Catalog item
    pub item_id: ItemId,
    /// Display name
    pub item_name: String,
    /// Units on hand
    pub quantity: u32,
    /// When it turned faulty, for faulty-equipment alerts
    pub faulty_since: Option<DateTime<Utc>>,
    /// Notifications sent for this subject, this one included
    pub alert_count: u32,
}

/// One aggregated alert batch for a station's managers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertEvent {
    /// Station
    pub station_id: StationId,
    /// Station display name
    pub station_name: String,
    /// Recipients
    pub manager_emails: Vec<String>,
    /// Condition type
    pub kind: AlertKind,
    /// First notice or follow-up
    pub notice: Notice,
    /// Subjects in the batch, never empty
    pub items: Vec<AlertedItem>,
    /// When the run happened
    pub at: DateTime<Utc>,
}

/// Everything the dispatcher turns into audit entries and messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LendingEvent {
    /// A request changed
    Request(RequestEvent),
    /// An escalation batch is due
    Alert(AlertEvent),
}

impl LendingEvent {
    /// Subject id recorded in the activity log.
    #[must_use]
    pub fn subject_id(&self) -> String {
        match self {
            Self::Request(e) => e.request_id.to_string(),
            Self::Alert(e) => e.station_id.to_string(),
        }
    }
}

impl From<RequestEvent> for LendingEvent {
    fn from(event: RequestEvent) -> Self {
        Self::Request(event)
    }
}

impl From<AlertEvent> for LendingEvent {
    fn from(event: AlertEvent) -> Self {
        Self::Alert(event)
    }
}
