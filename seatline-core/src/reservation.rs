use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::booking::{CancellationOutcome, Confirmation, ReservationLine, ReservationOutcome, SeatId, SeatReservationRequest};
use crate::repository::{RowLock, SeatStore, SeatTransaction};
use crate::{CoreError, CoreResult, RepoError};

enum Attempt {
    Written,
    Conflict(Vec<SeatId>),
}

/// Reserves seats with the ordered, non-blocking lock protocol.
///
/// Every caller locks seats in ascending id order and never waits on a held
/// row lock, so two reservations can never wait on each other. Contention
/// surfaces as `Conflict` instead of a stall.
pub struct ReservationCoordinator {
    store: Arc<dyn SeatStore>,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn SeatStore>) -> Self {
        Self { store }
    }

    pub async fn reserve_seats(&self, request: &SeatReservationRequest) -> CoreResult<ReservationOutcome> {
        request.validate()?;
        let total_price = request
            .total_price()
            .ok_or_else(|| CoreError::ValidationError("total price overflows".to_string()))?;

        let booking_id = request.booking_id;
        let lines = request.lines_in_lock_order();

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!("Booking {}: failed to open transaction: {}", booking_id, e);
                return Ok(ReservationOutcome::TransientFailure(e.to_string()));
            }
        };

        match lock_and_write(tx.as_mut(), booking_id, &lines).await {
            Ok(Attempt::Written) => match tx.commit().await {
                Ok(()) => {
                    let confirmation = Confirmation {
                        booking_id,
                        seat_ids: lines.iter().map(|l| l.seat_id).collect(),
                        total_price,
                    };
                    info!("Booking {} confirmed for seats {:?}", booking_id, confirmation.seat_ids);
                    Ok(ReservationOutcome::Confirmed(confirmation))
                }
                Err(e) => {
                    error!("Booking {}: commit failed: {}", booking_id, e);
                    Ok(ReservationOutcome::TransientFailure(e.to_string()))
                }
            },
            Ok(Attempt::Conflict(seat_ids)) => {
                rollback(tx, booking_id).await;
                warn!("Booking {} conflicted on seats {:?}", booking_id, seat_ids);
                Ok(ReservationOutcome::Conflict(seat_ids))
            }
            Err(e) => {
                rollback(tx, booking_id).await;
                error!("Booking {}: reservation aborted: {}", booking_id, e);
                Ok(ReservationOutcome::TransientFailure(e.to_string()))
            }
        }
    }

    pub async fn cancel_booking(&self, booking_id: Uuid) -> CoreResult<CancellationOutcome> {
        let outcome = self.store.release_booking(booking_id).await.map_err(|e| {
            error!("Booking {}: cancellation failed: {}", booking_id, e);
            CoreError::InternalError(e.to_string())
        })?;

        if let CancellationOutcome::Released(seat_ids) = &outcome {
            info!("Booking {} cancelled, released seats {:?}", booking_id, seat_ids);
        }
        Ok(outcome)
    }
}

async fn lock_and_write(
    tx: &mut dyn SeatTransaction,
    booking_id: Uuid,
    lines: &[ReservationLine],
) -> Result<Attempt, RepoError> {
    let mut conflicts = Vec::new();

    // Keep trying locks after the first conflict so the report names every contended seat.
    // try_lock_seat never waits, so walking the whole ascending list cannot deadlock.
    for line in lines {
        match tx.try_lock_seat(line.seat_id).await? {
            RowLock::Acquired => {
                if !tx.seat_available(line.seat_id).await? {
                    conflicts.push(line.seat_id);
                }
            }
            RowLock::Contended | RowLock::NotFound => conflicts.push(line.seat_id),
        }
    }

    if !conflicts.is_empty() {
        return Ok(Attempt::Conflict(conflicts));
    }

    for line in lines {
        tx.mark_unavailable(line.seat_id).await?;
        tx.insert_reservation_line(booking_id, line).await?;
    }

    Ok(Attempt::Written)
}

async fn rollback(tx: Box<dyn SeatTransaction>, booking_id: Uuid) {
    if let Err(e) = tx.rollback().await {
        warn!("Booking {}: rollback failed: {}", booking_id, e);
    }
}
