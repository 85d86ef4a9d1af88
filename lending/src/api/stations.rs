//! POST /api/stations/:id/escalations - Run both alert kinds for a station now.

use super::error::AppError;
use crate::error::LendingError;
use crate::escalation::EscalationReport;
use crate::server::state::AppState;
use crate::types::StationId;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

/// Body of a manual escalation trigger.
#[derive(Debug, Deserialize)]
pub struct EscalationBody {
    /// Manager triggering the run
    pub actor_name: String,
}

/// Run escalation for one station.
///
/// # Errors
///
/// 403 without approve-capability for the station, 404 for an unknown
/// station, 503 if storage is down.
pub async fn run_escalations(
    State(state): State<AppState>,
    Path(station_id): Path<StationId>,
    Json(body): Json<EscalationBody>,
) -> Result<Json<EscalationReport>, AppError> {
    if !state.authorizer.may_approve(&body.actor_name, station_id) {
        return Err(LendingError::Unauthorized {
            actor: body.actor_name,
            station_id,
        }
        .into());
    }

    tracing::info!(%station_id, actor = %body.actor_name, "manual escalation run");
    Ok(Json(state.engine.run_station(station_id).await?))
}
