use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

pub type SeatId = i64;

/// A request to reserve a set of seats under one booking.
///
/// `seat_ids`, `passenger_names` and `prices` are parallel sequences: entry `i`
/// of each describes the same reservation line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatReservationRequest {
    pub booking_id: Uuid,
    pub seat_ids: Vec<SeatId>,
    pub passenger_names: Vec<String>,
    pub prices: Vec<i64>,
}

impl SeatReservationRequest {
    pub fn new(booking_id: Uuid) -> Self {
        Self {
            booking_id,
            seat_ids: Vec::new(),
            passenger_names: Vec::new(),
            prices: Vec::new(),
        }
    }

    pub fn with_seat(mut self, seat_id: SeatId, passenger_name: impl Into<String>, price: i64) -> Self {
        self.seat_ids.push(seat_id);
        self.passenger_names.push(passenger_name.into());
        self.prices.push(price);
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.seat_ids.is_empty() {
            return Err(CoreError::ValidationError("at least one seat is required".to_string()));
        }
        if self.passenger_names.len() != self.seat_ids.len() || self.prices.len() != self.seat_ids.len() {
            return Err(CoreError::ValidationError(format!(
                "seat_ids ({}), passenger_names ({}) and prices ({}) must have the same length",
                self.seat_ids.len(),
                self.passenger_names.len(),
                self.prices.len()
            )));
        }

        let mut seen = HashSet::with_capacity(self.seat_ids.len());
        for seat_id in &self.seat_ids {
            if !seen.insert(*seat_id) {
                return Err(CoreError::ValidationError(format!("duplicate seat id {}", seat_id)));
            }
        }

        if let Some(price) = self.prices.iter().find(|p| **p < 0) {
            return Err(CoreError::ValidationError(format!("negative price {}", price)));
        }
        if self.total_price().is_none() {
            return Err(CoreError::ValidationError("total price overflows".to_string()));
        }
        if self.passenger_names.iter().any(|n| n.trim().is_empty()) {
            return Err(CoreError::ValidationError("passenger name must not be blank".to_string()));
        }

        Ok(())
    }

    /// Sum of all line prices, `None` on overflow.
    pub fn total_price(&self) -> Option<i64> {
        self.prices.iter().try_fold(0i64, |total, price| total.checked_add(*price))
    }

    /// Reservation lines sorted by ascending seat id, the global lock order.
    pub fn lines_in_lock_order(&self) -> Vec<ReservationLine> {
        let mut lines: Vec<ReservationLine> = self
            .seat_ids
            .iter()
            .zip(&self.passenger_names)
            .zip(&self.prices)
            .map(|((seat_id, name), price)| ReservationLine {
                seat_id: *seat_id,
                passenger_name: name.clone(),
                price: *price,
            })
            .collect();
        lines.sort_by_key(|line| line.seat_id);
        lines
    }
}

/// One booked seat within a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub seat_id: SeatId,
    pub passenger_name: String,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: SeatId,
    pub is_available: bool,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub booking_id: Uuid,
    pub seat_ids: Vec<SeatId>,
    pub total_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Confirmed(Confirmation),
    /// Seats that were locked by another transaction or already sold, ascending.
    Conflict(Vec<SeatId>),
    TransientFailure(String),
}

impl ReservationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReservationOutcome::Confirmed(_) => "confirmed",
            ReservationOutcome::Conflict(_) => "conflict",
            ReservationOutcome::TransientFailure(_) => "transient_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "seat_ids", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationOutcome {
    /// Seats returned to inventory; empty when the booking was already cancelled.
    Released(Vec<SeatId>),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Scheduled,
    Boarding,
    Departed,
    Delayed,
    Cancelled,
    Arrived,
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlightStatus::Scheduled => "SCHEDULED",
            FlightStatus::Boarding => "BOARDING",
            FlightStatus::Departed => "DEPARTED",
            FlightStatus::Delayed => "DELAYED",
            FlightStatus::Cancelled => "CANCELLED",
            FlightStatus::Arrived => "ARRIVED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightStatusChange {
    pub flight_id: i64,
    pub status: FlightStatus,
}
