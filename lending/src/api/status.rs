//! GET /api/status/:token - What the holder of a status link may see.

use super::error::AppError;
use crate::lifecycle::RequestStatusView;
use crate::server::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};

/// Status page for a token.
///
/// # Errors
///
/// 404 for an unknown or replaced token, 410 once the token has lapsed.
pub async fn get_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<RequestStatusView>, AppError> {
    Ok(Json(state.lifecycle.status(&token).await?))
}
