use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use seatline_core::FlightStatusChange;

use crate::error::{AppError, AppJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateStatusesRequest {
    pub changes: Vec<FlightStatusChange>,
}

#[derive(Debug, Serialize)]
pub struct UpdateStatusesResponse {
    pub updated: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/flights/status", post(update_statuses))
}

async fn update_statuses(
    State(state): State<AppState>,
    AppJson(req): AppJson<UpdateStatusesRequest>,
) -> Result<Json<UpdateStatusesResponse>, AppError> {
    if req.changes.is_empty() {
        return Err(AppError::ValidationError("No status changes supplied".to_string()));
    }

    let updated = state
        .flights
        .update_statuses(&req.changes)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    tracing::info!("Updated status of {} of {} flights", updated, req.changes.len());
    if updated > 0 {
        state.refresh.notify_write();
    }

    Ok(Json(UpdateStatusesResponse { updated }))
}
