use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use seatline_core::{CancellationOutcome, ReservationOutcome, SeatId, SeatReservationRequest};

use crate::error::{AppError, AppJson};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Generated when absent.
    pub booking_id: Option<Uuid>,
    pub seat_ids: Vec<SeatId>,
    pub passenger_names: Vec<String>,
    pub prices: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub booking_id: Uuid,
    pub status: &'static str,
    pub seat_ids: Vec<SeatId>,
    pub total_price: i64,
}

#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub booking_id: Uuid,
    pub status: &'static str,
    pub released_seat_ids: Vec<SeatId>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{booking_id}/cancel", post(cancel_booking))
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_booking(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateBookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let request = SeatReservationRequest {
        booking_id: req.booking_id.unwrap_or_else(Uuid::new_v4),
        seat_ids: req.seat_ids,
        passenger_names: req.passenger_names,
        prices: req.prices,
    };

    let outcome = match state.reservations.reserve_seats(&request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            state.metrics.record_reservation("invalid");
            return Err(AppError::from_core(e));
        }
    };
    state.metrics.record_reservation(outcome.label());

    match outcome {
        ReservationOutcome::Confirmed(confirmation) => {
            state.refresh.notify_write();
            Ok(Json(BookingResponse {
                booking_id: confirmation.booking_id,
                status: "CONFIRMED",
                seat_ids: confirmation.seat_ids,
                total_price: confirmation.total_price,
            }))
        }
        ReservationOutcome::Conflict(seat_ids) => Err(AppError::SeatConflict(seat_ids)),
        ReservationOutcome::TransientFailure(cause) => Err(AppError::InternalServerError(cause)),
    }
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<CancellationResponse>, AppError> {
    let outcome = state
        .reservations
        .cancel_booking(booking_id)
        .await
        .map_err(AppError::from_core)?;

    match outcome {
        CancellationOutcome::Released(seat_ids) => {
            if !seat_ids.is_empty() {
                state.refresh.notify_write();
            }
            Ok(Json(CancellationResponse {
                booking_id,
                status: "CANCELLED",
                released_seat_ids: seat_ids,
            }))
        }
        CancellationOutcome::NotFound => Err(AppError::NotFoundError(format!("Booking {} not found", booking_id))),
    }
}
