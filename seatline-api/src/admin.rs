use axum::{extract::State, routing::post, Json, Router};

use seatline_core::refresh::RefreshStatus;
use seatline_core::RefreshReport;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/admin/refresh", post(refresh_now).get(refresh_status))
}

/// Runs a refresh without the debounce delay and waits for its report.
async fn refresh_now(State(state): State<AppState>) -> Result<Json<RefreshReport>, AppError> {
    let report = state
        .refresh
        .refresh_now()
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(Json(report))
}

async fn refresh_status(State(state): State<AppState>) -> Json<RefreshStatus> {
    Json(state.refresh.status())
}
