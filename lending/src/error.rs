//! Error types for the lending domain and its storage layer.

use crate::types::{ItemId, RequestStatus, StationId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The backing store could not be reached or rejected the query.
    #[error("Database error: {0}")]
    Database(String),

    /// A compare-and-swap on a request status lost to a concurrent writer.
    #[error("Request status changed concurrently: {0}")]
    Conflict(String),

    /// A guarded stock decrement found fewer units than required, or the
    /// stock turned faulty, between validation and commit.
    #[error("Stock guard failed for item {item_id}")]
    StockGuard {
        /// Item whose guard failed
        item_id: ItemId,
    },

    /// A row the operation depends on does not exist.
    #[error("{0} not found")]
    Missing(String),

    /// A stored value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error.to_string())
    }
}

/// Errors returned by lifecycle and escalation operations.
///
/// Everything except [`LendingError::Storage`] is a business-rule outcome and
/// is raised before any mutation is applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LendingError {
    /// Request, station or stock row missing.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of thing that is missing
        entity: &'static str,
        /// Its identifier
        id: String,
    },

    /// The action is not legal from the request's current status.
    #[error("Cannot {action} a request that is {from}")]
    InvalidTransition {
        /// Attempted action
        action: &'static str,
        /// Status at the time of the attempt
        from: RequestStatus,
    },

    /// The station's stock of an item is not in working condition.
    #[error("{item_name} is not in working condition")]
    EquipmentUnavailable {
        /// Item id
        item_id: ItemId,
        /// Item display name
        item_name: String,
    },

    /// Not enough units on hand.
    #[error("Only {available} of {item_name} available, {requested} requested")]
    InsufficientStock {
        /// Item id
        item_id: ItemId,
        /// Item display name
        item_name: String,
        /// Units requested
        requested: u32,
        /// Units on hand
        available: u32,
    },

    /// The caller may not approve for the station.
    #[error("{actor} may not manage station {station_id}")]
    Unauthorized {
        /// Caller
        actor: String,
        /// Station the caller tried to act on
        station_id: StationId,
    },

    /// The presented token is past its validity window.
    #[error("Link expired at {expires_at}")]
    Expired {
        /// When the token lapsed
        expires_at: DateTime<Utc>,
    },

    /// A notification could not be delivered. Never fatal; logged only.
    #[error("Notification failed: {0}")]
    NotificationFailed(String),

    /// Input rejected before reaching the lifecycle (e.g. empty item list).
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The backing store failed. Safe to retry.
    #[error("Storage unavailable: {0}")]
    Storage(String),
}

impl LendingError {
    /// Shorthand for a missing request.
    #[must_use]
    pub fn request_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "request",
            id: id.to_string(),
        }
    }

    /// System errors are retryable; business-rule rejections are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::EquipmentUnavailable { .. } => "equipment_unavailable",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Expired { .. } => "expired",
            Self::NotificationFailed(_) => "notification_failed",
            Self::Invalid(_) => "invalid",
            Self::Storage(_) => "storage",
        }
    }

    /// Text suitable for showing to the person who triggered the error.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Expired { .. } => {
                "This link has expired. Please ask the station to send you a new one.".to_string()
            },
            Self::Storage(_) => "The service is temporarily unavailable. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RepositoryError> for LendingError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Missing(what) => Self::NotFound {
                entity: "record",
                id: what,
            },
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Result type for lending operations.
pub type Result<T> = std::result::Result<T, LendingError>;
