//! Inputs and outputs of lifecycle operations.

use crate::error::LendingError;
use crate::types::{
    EquipmentRequest, ItemId, RequestId, RequestItem, RequestStatus, StationId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A manager action on an existing request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LifecycleAction {
    /// Validate stock, commit it and hand the equipment over
    Approve,
    /// Decline, optionally with a reason shown to the requester
    Reject {
        /// Reason shown to the requester
        #[serde(default)]
        reason: Option<String>,
    },
    /// Withdraw before pickup
    Cancel,
    /// Issue a fresh token
    Regenerate,
    /// Compensate a pickup, restoring inventory
    UndoPickup,
    /// Send the current token to the requester again
    ResendToken,
}

impl LifecycleAction {
    /// Wire and metric name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject { .. } => "reject",
            Self::Cancel => "cancel",
            Self::Regenerate => "regenerate",
            Self::UndoPickup => "undo_pickup",
            Self::ResendToken => "resend_token",
        }
    }

    /// Build an action from its wire name and optional reason.
    ///
    /// # Errors
    ///
    /// Returns [`LendingError::Invalid`] for an unknown action name.
    pub fn parse(name: &str, reason: Option<String>) -> Result<Self, LendingError> {
        match name {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject {
                reason: reason.filter(|r| !r.trim().is_empty()),
            }),
            "cancel" => Ok(Self::Cancel),
            "regenerate" => Ok(Self::Regenerate),
            "undo_pickup" => Ok(Self::UndoPickup),
            "resend_token" => Ok(Self::ResendToken),
            other => Err(LendingError::Invalid(format!("unknown action '{other}'"))),
        }
    }
}

/// `{requestId, action, actorName, stationId}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRequest {
    /// Target request
    pub request_id: RequestId,
    /// Station the caller acts for
    pub station_id: StationId,
    /// Caller
    pub actor_name: String,
    /// What to do
    pub action: LifecycleAction,
}

impl ActionRequest {
    /// Creates a new `ActionRequest`.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        station_id: StationId,
        actor_name: impl Into<String>,
        action: LifecycleAction,
    ) -> Self {
        Self {
            request_id,
            station_id,
            actor_name: actor_name.into(),
            action,
        }
    }
}

/// Success payload of a lifecycle operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    /// Request
    pub request_id: RequestId,
    /// Status after the operation
    pub status: RequestStatus,
    /// Newly issued token, on token-affecting operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Expiry of the newly issued token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ActionOutcome {
    pub(crate) const fn of(request: &EquipmentRequest) -> Self {
        Self {
            request_id: request.id,
            status: request.status,
            token: None,
            expires_at: None,
        }
    }

    pub(crate) fn with_token(request: &EquipmentRequest) -> Self {
        Self {
            token: Some(request.token.clone()),
            expires_at: Some(request.expires_at),
            ..Self::of(request)
        }
    }
}

/// One line of a new request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequestItem {
    /// Catalog item
    pub item_id: ItemId,
    /// Units wanted
    pub quantity: u32,
}

/// A request as submitted by a member of the public.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    /// Station to borrow from
    pub station_id: StationId,
    /// Requester name
    pub requester_name: String,
    /// Requester phone
    pub requester_phone: String,
    /// Dispatch call identifier
    #[serde(default)]
    pub call_id: Option<String>,
    /// Requested items
    pub items: Vec<NewRequestItem>,
}

/// What the holder of a status link may see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestStatusView {
    /// Request
    pub request_id: RequestId,
    /// Station
    pub station_id: StationId,
    /// Requester name
    pub requester_name: String,
    /// Current status
    pub status: RequestStatus,
    /// Requested items
    pub items: Vec<RequestItem>,
    /// Reason given on rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
    /// When the link stops working
    pub expires_at: DateTime<Utc>,
    /// When the request was approved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl RequestStatusView {
    pub(crate) fn new(request: EquipmentRequest, items: Vec<RequestItem>) -> Self {
        Self {
            request_id: request.id,
            station_id: request.station_id,
            requester_name: request.requester_name,
            status: request.status,
            items,
            rejected_reason: request.rejected_reason,
            expires_at: request.expires_at,
            approved_at: request.approved_at,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_every_wire_name() {
        for name in ["approve", "reject", "cancel", "regenerate", "undo_pickup", "resend_token"] {
            assert_eq!(LifecycleAction::parse(name, None).unwrap().name(), name);
        }
        assert!(LifecycleAction::parse("confirm_pickup", None).is_err());
    }

    #[test]
    fn blank_reason_is_dropped() {
        assert_eq!(
            LifecycleAction::parse("reject", Some("  ".to_string())).unwrap(),
            LifecycleAction::Reject { reason: None }
        );
    }

    #[test]
    fn action_serializes_with_tag() {
        let json = serde_json::to_value(LifecycleAction::Reject {
            reason: Some("broken".to_string()),
        })
        .unwrap();
        assert_eq!(json["action"], "reject");
        assert_eq!(json["reason"], "broken");
    }
}
