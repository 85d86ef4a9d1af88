//! Error types for web handlers.
//!
//! Bridges [`LendingError`] and HTTP responses via Axum's `IntoResponse`.

use crate::error::LendingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<ActionOutcome>, AppError> {
///     Ok(Json(state.lifecycle.approve(id, &actor, station_id).await?))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Map lifecycle and escalation errors onto HTTP statuses.
impl From<LendingError> for AppError {
    fn from(err: LendingError) -> Self {
        let status = match &err {
            LendingError::NotFound { .. } => StatusCode::NOT_FOUND,
            LendingError::InvalidTransition { .. }
            | LendingError::EquipmentUnavailable { .. }
            | LendingError::InsufficientStock { .. } => StatusCode::CONFLICT,
            LendingError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            LendingError::Expired { .. } => StatusCode::GONE,
            LendingError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LendingError::NotificationFailed(_) | LendingError::Storage(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            },
        };

        let app = Self::new(status, err.user_message(), err.code().to_uppercase());
        if err.is_retryable() {
            app.with_source(anyhow::Error::new(err))
        } else {
            app
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, RequestStatus, StationId};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn lending_errors_map_to_statuses() {
        let cases = [
            (LendingError::request_not_found("r-1"), StatusCode::NOT_FOUND),
            (
                LendingError::InvalidTransition {
                    action: "approve",
                    from: RequestStatus::Rejected,
                },
                StatusCode::CONFLICT,
            ),
            (
                LendingError::InsufficientStock {
                    item_id: ItemId::new(),
                    item_name: "rope".to_string(),
                    requested: 2,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                LendingError::Unauthorized {
                    actor: "mallory".to_string(),
                    station_id: StationId::new(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                LendingError::Expired {
                    expires_at: chrono::Utc::now(),
                },
                StatusCode::GONE,
            ),
            (LendingError::Invalid("no items".to_string()), StatusCode::UNPROCESSABLE_ENTITY),
            (LendingError::Storage("down".to_string()), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn code_is_uppercased_domain_code() {
        let err = AppError::from(LendingError::EquipmentUnavailable {
            item_id: ItemId::new(),
            item_name: "stretcher".to_string(),
        });
        assert_eq!(err.code(), "EQUIPMENT_UNAVAILABLE");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
