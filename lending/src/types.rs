//! Domain types for station equipment lending.
//!
//! Identifiers, status enums, and the persisted entities shared by the
//! lifecycle controller, the escalation engine and the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a station (an equipment cabinet in one city)
    StationId
);
uuid_id!(
    /// Unique identifier for a catalog item (a type of equipment)
    ItemId
);
uuid_id!(
    /// Unique identifier for an equipment request
    RequestId
);
uuid_id!(
    /// Unique identifier for a borrow record
    BorrowRecordId
);
uuid_id!(
    /// Unique identifier for an alert tracking row
    TrackingId
);

// ============================================================================
// Enums
// ============================================================================

/// Error returned when a stored enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable text form used in storage and the HTTP API.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

/// Status of an equipment request.
///
/// Approval commits inventory and moves a request straight to `PickedUp`.
/// `Approved` is never produced by this crate; it is accepted on input for
/// rows written by older tooling, and `cancel`/`regenerate` still honour it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Submitted, awaiting a manager decision
    Pending,
    /// Legacy resting state between approval and pickup
    Approved,
    /// Declined by a manager (terminal)
    Rejected,
    /// Withdrawn or compensated (terminal)
    Cancelled,
    /// Token lapsed before a decision
    Expired,
    /// Inventory committed and handed over
    PickedUp,
}

text_enum!(RequestStatus, "request status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Expired => "expired",
    PickedUp => "picked_up",
});

impl RequestStatus {
    /// Terminal states accept no further lifecycle action.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }
}

/// Physical condition of the stock of one item at one station.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Usable
    Working,
    /// Broken, awaiting repair
    Faulty,
}

text_enum!(Condition, "condition", {
    Working => "working",
    Faulty => "faulty",
});

/// Custody status of a borrow record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowStatus {
    /// Item is with the borrower
    Borrowed,
    /// Borrow recorded by a volunteer, awaiting a manager
    PendingApproval,
    /// Item is back at the station
    Returned,
}

text_enum!(BorrowStatus, "borrow status", {
    Borrowed => "borrowed",
    PendingApproval => "pending_approval",
    Returned => "returned",
});

/// Condition type watched by the escalation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Quantity at or below the threshold
    LowStock,
    /// Faulty for longer than the allowed age
    FaultyEquipment,
}

text_enum!(AlertKind, "alert kind", {
    LowStock => "low_stock",
    FaultyEquipment => "faulty_equipment",
});

impl AlertKind {
    /// Both kinds, in the order the engine runs them.
    pub const ALL: [Self; 2] = [Self::LowStock, Self::FaultyEquipment];
}

// ============================================================================
// Entities
// ============================================================================

/// A station: one city's equipment cabinet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    /// Station id
    pub id: StationId,
    /// Display name
    pub name: String,
    /// Email addresses of the station managers (alert recipients)
    pub manager_emails: Vec<String>,
}

/// A type of loanable equipment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Item id
    pub id: ItemId,
    /// Display name, e.g. "rope"
    pub name: String,
    /// Consumables are never returned
    pub is_consumable: bool,
}

/// Stock of one catalog item at one station.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationStock {
    /// Station holding the stock
    pub station_id: StationId,
    /// Catalog item
    pub item_id: ItemId,
    /// Copied from the catalog for display
    pub item_name: String,
    /// Units on hand, never negative
    pub quantity: u32,
    /// Working or faulty
    pub condition: Condition,
    /// Copied from the catalog
    pub is_consumable: bool,
    /// When the stock last turned faulty; `None` while working
    pub faulty_since: Option<DateTime<Utc>>,
}

/// An equipment request from a member of the public.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRequest {
    /// Request id
    pub id: RequestId,
    /// Station the equipment is requested from
    pub station_id: StationId,
    /// Requester name
    pub requester_name: String,
    /// Requester phone (WhatsApp recipient, borrow record key)
    pub requester_phone: String,
    /// Optional dispatch call identifier
    pub call_id: Option<String>,
    /// Lifecycle status
    pub status: RequestStatus,
    /// Live bearer token, kept so it can be re-sent
    pub token: String,
    /// SHA-256 of the token, used for lookups
    pub token_hash: String,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
    /// Manager who approved
    pub approved_by: Option<String>,
    /// When the request was approved
    pub approved_at: Option<DateTime<Utc>>,
    /// Reason given on rejection
    pub rejected_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last lifecycle change
    pub updated_at: DateTime<Utc>,
}

/// One line of an equipment request. Immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    /// Owning request
    pub request_id: RequestId,
    /// Requested catalog item
    pub item_id: ItemId,
    /// Units requested, at least 1
    pub quantity: u32,
}

/// A physical custody record for a reusable item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRecord {
    /// Record id
    pub id: BorrowRecordId,
    /// Request that produced the record, when there was one
    pub request_id: Option<RequestId>,
    /// Station the item came from
    pub station_id: StationId,
    /// Catalog item
    pub item_id: ItemId,
    /// Units borrowed
    pub quantity: u32,
    /// Borrower name
    pub borrower_name: String,
    /// Borrower phone
    pub borrower_phone: String,
    /// Custody status
    pub status: BorrowStatus,
    /// When the item left the station
    pub borrow_date: DateTime<Utc>,
    /// When it came back
    pub return_date: Option<DateTime<Utc>>,
    /// Condition reported on return
    pub return_condition: Option<Condition>,
}

/// Debounce record for one (station, alert kind, item).
///
/// `resolved_at == None` means the condition is still open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertTracking {
    /// Row id
    pub id: TrackingId,
    /// Station
    pub station_id: StationId,
    /// Condition type
    pub kind: AlertKind,
    /// Catalog item the alert is about
    pub item_id: ItemId,
    /// When the condition was first raised
    pub first_alert_at: DateTime<Utc>,
    /// When managers were last notified
    pub last_alert_at: DateTime<Utc>,
    /// Notifications sent so far
    pub alert_count: u32,
    /// When the condition cleared
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertTracking {
    /// Whether the row still tracks an unresolved condition.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_text_round_trips_through_storage_form() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
            RequestStatus::Expired,
            RequestStatus::PickedUp,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "lost".parse::<RequestStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown request status value 'lost'");
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&RequestStatus::PickedUp).unwrap();
        assert_eq!(json, "\"picked_up\"");
        let json = serde_json::to_string(&AlertKind::FaultyEquipment).unwrap();
        assert_eq!(json, "\"faulty_equipment\"");
    }

    #[test]
    fn ids_serialize_as_bare_uuids() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
