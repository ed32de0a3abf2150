use std::sync::Arc;
use seatline_core::repository::{FlightStore, SeatStore};
use seatline_core::{RefreshCoordinator, ReservationCoordinator};
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationCoordinator>,
    pub flights: Arc<dyn FlightStore>,
    pub refresh: RefreshCoordinator,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        seats: Arc<dyn SeatStore>,
        flights: Arc<dyn FlightStore>,
        refresh: RefreshCoordinator,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            reservations: Arc::new(ReservationCoordinator::new(seats)),
            flights,
            refresh,
            metrics: Arc::new(Metrics::new()?),
        })
    }
}
