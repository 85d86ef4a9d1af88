//! Append-only activity log capability.
//!
//! Every mutating operation records who did what to which subject. Writes are
//! fire-and-forget: a failed write is logged by the runtime and dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// One activity log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Who performed the action (manager name, or `system` for scheduled work)
    pub actor: String,
    /// Action name, e.g. `request.approved`
    pub action: String,
    /// Identifier of the affected subject
    pub subject_id: String,
    /// Free-form structured details
    pub details: serde_json::Value,
    /// When the action happened
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Create an entry with empty details.
    #[must_use]
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        subject_id: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            subject_id: subject_id.into(),
            details: serde_json::Value::Null,
            recorded_at,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Errors from an [`AuditLog`] write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// Backing storage rejected the write.
    #[error("Audit storage error: {0}")]
    Storage(String),
}

/// Append-only activity log.
pub trait AuditLog: Send + Sync {
    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the entry could not be stored.
    fn record(
        &self,
        entry: AuditEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>>;
}
