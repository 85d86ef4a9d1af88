//! Request endpoints.
//!
//! - POST /api/requests - Submit a request (public)
//! - POST /api/requests/:id/actions - Run a manager action

use super::error::AppError;
use crate::lifecycle::{ActionOutcome, ActionRequest, LifecycleAction, NewRequest};
use crate::server::state::AppState;
use crate::types::{RequestId, StationId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

/// Body of a manager action.
#[derive(Debug, Deserialize)]
pub struct ActionBody {
    /// `approve | reject | cancel | regenerate | undo_pickup | resend_token`
    pub action: String,
    /// Manager performing the action
    pub actor_name: String,
    /// Station the manager acts for
    pub station_id: StationId,
    /// Rejection reason
    #[serde(default)]
    pub reason: Option<String>,
}

/// Submit a new equipment request.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/requests \
///   -H "Content-Type: application/json" \
///   -d '{"station_id":"…","requester_name":"Dana","requester_phone":"+972500000001",
///        "items":[{"item_id":"…","quantity":1}]}'
/// ```
///
/// # Errors
///
/// 422 for an empty or malformed request, 404 for an unknown station or item.
pub async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<NewRequest>,
) -> Result<(StatusCode, Json<ActionOutcome>), AppError> {
    let outcome = state.lifecycle.submit(body).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Run a lifecycle action on a request.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/requests/<id>/actions \
///   -H "Content-Type: application/json" \
///   -d '{"action":"approve","actor_name":"alice","station_id":"…"}'
/// ```
///
/// # Errors
///
/// 403 without approve-capability, 404 for an unknown request, 409 for an
/// illegal transition or missing stock, 503 if storage is down.
pub async fn perform_action(
    State(state): State<AppState>,
    Path(request_id): Path<RequestId>,
    Json(body): Json<ActionBody>,
) -> Result<Json<ActionOutcome>, AppError> {
    let action = LifecycleAction::parse(body.action.trim(), body.reason)?;
    let outcome = state
        .lifecycle
        .perform(ActionRequest::new(
            request_id,
            body.station_id,
            body.actor_name,
            action,
        ))
        .await?;
    Ok(Json(outcome))
}
