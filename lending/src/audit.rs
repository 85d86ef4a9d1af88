//! [`AuditLog`] implementations.

use lending_core::audit::{AuditEntry, AuditError, AuditLog};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Writes entries to the log under the `audit` target.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditLog;

impl TracingAuditLog {
    /// Creates a new `TracingAuditLog`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AuditLog for TracingAuditLog {
    fn record(
        &self,
        entry: AuditEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                target: "audit",
                actor = %entry.actor,
                action = %entry.action,
                subject_id = %entry.subject_id,
                details = %entry.details,
                recorded_at = %entry.recorded_at,
                "activity"
            );
            Ok(())
        })
    }
}

/// Appends entries to the `activity_log` table.
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: Arc<PgPool>,
}

impl PostgresAuditLog {
    /// Creates a new `PostgresAuditLog` on an existing pool.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

impl AuditLog for PostgresAuditLog {
    fn record(
        &self,
        entry: AuditEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO activity_log (actor, action, subject_id, details, recorded_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&entry.actor)
            .bind(&entry.action)
            .bind(&entry.subject_id)
            .bind(&entry.details)
            .bind(entry.recorded_at)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| AuditError::Storage(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn tracing_log_accepts_entries() {
        TracingAuditLog::new()
            .record(AuditEntry::new("alice", "request.approved", "r-1", Utc::now()))
            .await
            .unwrap();
    }
}
